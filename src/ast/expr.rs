//! Expression AST (spec §3, "Expression node variants").

use serde::{Deserialize, Serialize};

use crate::error::Loc;
use crate::value::Value;

/// Function names accepted by [ExprKind::Call]. Closed whitelist — anything
/// else is rejected by the parser with `E_BAD_EXPR`.
pub const CALL_WHITELIST: &[&str] = &["coalesce", "if", "put", "input"];

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: Loc,
}

impl Expr {
    pub fn new(kind: ExprKind, loc: Loc) -> Self {
        Expr { kind, loc }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Lit(Value),
    /// Column reference; name may be dotted (`first.x`, `t.c`).
    Col(String),
    UnOp {
        op: UnOp,
        arg: Box<Expr>,
    },
    BinOp {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// n-ary, left-associative flattening of same-op `and`/`or` chains.
    BoolOp {
        op: BoolOp,
        args: Vec<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr)]
pub enum UnOp {
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "-")]
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr)]
pub enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr)]
pub enum BoolOp {
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
}
