//! Per-row expression evaluation (spec §4.6 "Per-row expression evaluation").

use std::collections::{BTreeMap, HashMap};

use num_bigint::BigInt;

use crate::ast::expr::{BinOp, BoolOp, Expr, ExprKind, UnOp};
use crate::decimal::Decimal;
use crate::error::{codes, Diagnostic};
use crate::value::{unify, UnifyCtx, Value};

/// Fixed fractional scale used when a `/` produces a non-terminating
/// quotient; spec §9 requires DECIMAL to have a finite expansion, so
/// division rounds half-up at this many fractional digits.
const DEFAULT_DIV_SCALE: u32 = 10;

#[derive(Debug, Clone, Default)]
pub struct FormatDef {
    pub mapping: BTreeMap<String, String>,
    pub other: Option<String>,
}

/// Named value-map registry built from `format` steps (spec §4.6), flowing
/// through the engine as a per-run value rather than global state (spec §9).
#[derive(Debug, Clone, Default)]
pub struct FormatRegistry {
    pub formats: HashMap<String, FormatDef>,
}

impl FormatRegistry {
    pub fn register(&mut self, name: String, def: FormatDef) {
        self.formats.insert(name, def);
    }
}

/// Read-only view over the row being evaluated, plus ambient state
/// (scalars, format registry) needed by `Col`/`put`/`input`/`let_scalar`.
pub struct EvalCtx<'a> {
    pub columns: &'a [String],
    pub row: &'a [Value],
    pub scalars: &'a HashMap<String, Value>,
    pub formats: &'a FormatRegistry,
}

impl<'a> EvalCtx<'a> {
    /// Resolves a column reference. An exact match wins; otherwise, for
    /// qualified columns produced by `sql_select` joins (`"t1.id"`), a bare
    /// name resolves against the unqualified suffix if exactly one column
    /// matches, else `SANS_RUNTIME_SQL_AMBIGUOUS_COLUMN`.
    pub fn resolve(&self, name: &str, loc: &crate::error::Loc) -> Result<Value, Diagnostic> {
        if let Some(i) = self.columns.iter().position(|c| c == name) {
            return Ok(self.row[i].clone());
        }
        let matches: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.rsplit('.').next() == Some(name))
            .map(|(i, _)| i)
            .collect();
        match matches.as_slice() {
            [i] => Ok(self.row[*i].clone()),
            [] => {
                if let Some(v) = self.scalars.get(name) {
                    return Ok(v.clone());
                }
                Err(Diagnostic::new(
                    codes::SANS_RUNTIME_MISSING_COLUMN,
                    format!("no such column '{name}'"),
                )
                .with_loc(loc.clone()))
            }
            _ => Err(Diagnostic::new(
                codes::SANS_RUNTIME_SQL_AMBIGUOUS_COLUMN,
                format!("column reference '{name}' is ambiguous across joined tables"),
            )
            .with_loc(loc.clone())),
        }
    }
}

pub fn eval(expr: &Expr, ctx: &EvalCtx) -> Result<Value, Diagnostic> {
    match &expr.kind {
        ExprKind::Lit(v) => Ok(v.clone()),
        ExprKind::Col(name) => ctx.resolve(name, &expr.loc),
        ExprKind::UnOp { op, arg } => eval_unop(*op, arg, ctx),
        ExprKind::BinOp { op, lhs, rhs } => eval_binop(*op, lhs, rhs, ctx),
        ExprKind::BoolOp { op, args } => eval_boolop(*op, args, ctx),
        ExprKind::Call { name, args } => eval_call(name, args, ctx, &expr.loc),
    }
}

fn eval_unop(op: UnOp, arg: &Expr, ctx: &EvalCtx) -> Result<Value, Diagnostic> {
    let v = eval(arg, ctx)?;
    match (op, v) {
        (UnOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnOp::Not, Value::Null) => Ok(Value::Null),
        (UnOp::Not, other) => type_err(&arg.loc, format!("'not' requires BOOL, got {}", other.type_tag())),
        (UnOp::Neg, Value::Null) => Ok(Value::Null),
        (UnOp::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
        (UnOp::Neg, Value::Decimal(d)) => Ok(Value::Decimal(d.mul(&Decimal::from_i64(-1)))),
        (UnOp::Neg, other) => type_err(&arg.loc, format!("unary '-' requires INT or DECIMAL, got {}", other.type_tag())),
    }
}

fn eval_binop(op: BinOp, lhs: &Expr, rhs: &Expr, ctx: &EvalCtx) -> Result<Value, Diagnostic> {
    let l = eval(lhs, ctx)?;
    let r = eval(rhs, ctx)?;
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => eval_arith(op, l, r, &lhs.loc.merge(&rhs.loc)),
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            eval_cmp(op, l, r, &lhs.loc.merge(&rhs.loc))
        }
    }
}

fn eval_arith(op: BinOp, l: Value, r: Value, loc: &crate::error::Loc) -> Result<Value, Diagnostic> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    let ty = unify(l.type_tag(), r.type_tag(), UnifyCtx::Strict)
        .map_err(|d| d.with_loc(loc.clone()))?;
    if ty != crate::value::Type::Int && ty != crate::value::Type::Decimal {
        return type_err(loc, format!("arithmetic requires INT/DECIMAL, got {}", ty));
    }
    if ty == crate::value::Type::Int {
        let (a, b) = (as_bigint(&l), as_bigint(&r));
        return Ok(match op {
            BinOp::Add => Value::Int(a + b),
            BinOp::Sub => Value::Int(a - b),
            BinOp::Mul => Value::Int(a * b),
            BinOp::Div => {
                if b == BigInt::from(0) {
                    return Err(Diagnostic::new(codes::SANS_RUNTIME_DIVIDE_BY_ZERO, "division by zero")
                        .with_loc(loc.clone()));
                }
                let da = Decimal::from_bigint(&a);
                let db = Decimal::from_bigint(&b);
                match da.div(&db, DEFAULT_DIV_SCALE) {
                    Some(d) => Value::Decimal(d),
                    None => {
                        return Err(Diagnostic::new(codes::SANS_RUNTIME_DIVIDE_BY_ZERO, "division by zero")
                            .with_loc(loc.clone()))
                    }
                }
            }
            _ => unreachable!(),
        });
    }
    let (a, b) = (as_decimal(&l), as_decimal(&r));
    Ok(match op {
        BinOp::Add => Value::Decimal(a.add(&b)),
        BinOp::Sub => Value::Decimal(a.sub(&b)),
        BinOp::Mul => Value::Decimal(a.mul(&b)),
        BinOp::Div => match a.div(&b, DEFAULT_DIV_SCALE) {
            Some(d) => Value::Decimal(d),
            None => {
                return Err(Diagnostic::new(codes::SANS_RUNTIME_DIVIDE_BY_ZERO, "division by zero")
                    .with_loc(loc.clone()))
            }
        },
        _ => unreachable!(),
    })
}

fn as_bigint(v: &Value) -> BigInt {
    match v {
        Value::Int(i) => i.clone(),
        _ => unreachable!("caller checked type_tag() == Int"),
    }
}

fn as_decimal(v: &Value) -> Decimal {
    match v {
        Value::Decimal(d) => d.clone(),
        Value::Int(i) => Decimal::from_bigint(i),
        _ => unreachable!("caller checked type_tag() == Decimal after unify"),
    }
}

fn eval_cmp(op: BinOp, l: Value, r: Value, loc: &crate::error::Loc) -> Result<Value, Diagnostic> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    let ord = l.compare(&r).map_err(|d| d.with_loc(loc.clone()))?;
    use std::cmp::Ordering::*;
    Ok(Value::Bool(match op {
        BinOp::Eq => ord == Equal,
        BinOp::Ne => ord != Equal,
        BinOp::Lt => ord == Less,
        BinOp::Le => ord != Greater,
        BinOp::Gt => ord == Greater,
        BinOp::Ge => ord != Less,
        _ => unreachable!(),
    }))
}

fn eval_boolop(op: BoolOp, args: &[Expr], ctx: &EvalCtx) -> Result<Value, Diagnostic> {
    match op {
        BoolOp::And => {
            for a in args {
                if !eval(a, ctx)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        BoolOp::Or => {
            for a in args {
                if eval(a, ctx)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
    }
}

fn eval_call(name: &str, args: &[Expr], ctx: &EvalCtx, loc: &crate::error::Loc) -> Result<Value, Diagnostic> {
    match name {
        "coalesce" => {
            for a in args {
                let v = eval(a, ctx)?;
                if !v.is_null() {
                    return Ok(v);
                }
            }
            Ok(Value::Null)
        }
        "if" => {
            if args.len() != 3 {
                return unsupported(loc, "'if' requires exactly 3 arguments");
            }
            let cond = eval(&args[0], ctx)?;
            match cond {
                Value::Bool(true) => eval(&args[1], ctx),
                Value::Bool(false) | Value::Null => eval(&args[2], ctx),
                other => type_err(loc, format!("'if' condition must be BOOL, got {}", other.type_tag())),
            }
        }
        "put" => {
            if args.len() != 2 {
                return unsupported(loc, "'put' requires exactly 2 arguments (value, format name)");
            }
            let v = eval(&args[0], ctx)?;
            let fmt_name = literal_format_name(&args[1])?;
            let def = ctx.formats.formats.get(&fmt_name).ok_or_else(|| {
                Diagnostic::new(
                    codes::SANS_RUNTIME_FORMAT_UNDEFINED,
                    format!("format '{fmt_name}' is not defined"),
                )
                .with_loc(loc.clone())
            })?;
            if v.is_null() {
                return Ok(Value::Null);
            }
            let key = v.to_string();
            match def.mapping.get(&key) {
                Some(mapped) => Ok(Value::String(mapped.clone())),
                None => match &def.other {
                    Some(other) => Ok(Value::String(other.clone())),
                    None => Err(Diagnostic::new(
                        codes::SANS_RUNTIME_FORMAT_UNDEFINED,
                        format!("format '{fmt_name}' has no mapping or other-default for '{key}'"),
                    )
                    .with_loc(loc.clone())),
                },
            }
        }
        "input" => {
            if args.len() != 2 {
                return unsupported(loc, "'input' requires exactly 2 arguments (value, informat name)");
            }
            let v = eval(&args[0], ctx)?;
            let informat = literal_format_name(&args[1])?;
            if informat != "best" {
                return Err(Diagnostic::new(
                    codes::SANS_RUNTIME_INFORMAT_UNSUPPORTED,
                    format!("informat '{informat}' is not supported"),
                )
                .with_loc(loc.clone()));
            }
            let s = match v {
                Value::Null => return Ok(Value::Null),
                Value::String(s) => s,
                other => other.to_string(),
            };
            if s.trim().is_empty() {
                return Ok(Value::Null);
            }
            Ok(Value::infer_from_token(&s))
        }
        other => unsupported(loc, format!("function '{other}' is not implemented")),
    }
}

/// `put`/`input`'s second argument names a format/informat. The expression
/// lexer has no bare `$fmt.`/`best.` token class, so that name is written
/// as a plain string literal (`put(v, "status")`) rather than SAS's bare
/// `$status.` token.
fn literal_format_name(e: &Expr) -> Result<String, Diagnostic> {
    match &e.kind {
        ExprKind::Lit(Value::String(s)) => Ok(s.clone()),
        ExprKind::Col(s) => Ok(s.clone()),
        _ => Err(Diagnostic::new(
            codes::SANS_RUNTIME_UNSUPPORTED_EXPR_NODE,
            "format/informat name must be a string literal",
        )
        .with_loc(e.loc.clone())),
    }
}

fn type_err<T>(loc: &crate::error::Loc, msg: impl Into<String>) -> Result<T, Diagnostic> {
    Err(Diagnostic::new(codes::SANS_RUNTIME_TYPE, msg).with_loc(loc.clone()))
}

fn unsupported<T>(loc: &crate::error::Loc, msg: impl Into<String>) -> Result<T, Diagnostic> {
    Err(Diagnostic::new(codes::SANS_RUNTIME_UNSUPPORTED_EXPR_NODE, msg).with_loc(loc.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parser::parse_expr;
    use crate::error::Loc;

    fn ctx<'a>(columns: &'a [String], row: &'a [Value], scalars: &'a HashMap<String, Value>, formats: &'a FormatRegistry) -> EvalCtx<'a> {
        EvalCtx { columns, row, scalars, formats }
    }

    #[test]
    fn division_by_zero_is_refused() {
        let e = parse_expr("a / b", "t.sans", 1).unwrap();
        let columns = vec!["a".to_string(), "b".to_string()];
        let row = vec![Value::Int(1.into()), Value::Int(0.into())];
        let scalars = HashMap::new();
        let formats = FormatRegistry::default();
        let c = ctx(&columns, &row, &scalars, &formats);
        let err = eval(&e, &c).unwrap_err();
        assert_eq!(err.code, codes::SANS_RUNTIME_DIVIDE_BY_ZERO);
    }

    #[test]
    fn null_propagates_through_arithmetic() {
        let e = parse_expr("a + b", "t.sans", 1).unwrap();
        let columns = vec!["a".to_string(), "b".to_string()];
        let row = vec![Value::Null, Value::Int(1.into())];
        let scalars = HashMap::new();
        let formats = FormatRegistry::default();
        let c = ctx(&columns, &row, &scalars, &formats);
        assert_eq!(eval(&e, &c).unwrap(), Value::Null);
    }

    #[test]
    fn ambiguous_qualified_column_is_refused() {
        let e = parse_expr("id", "t.sans", 1).unwrap();
        let columns = vec!["t1.id".to_string(), "t2.id".to_string()];
        let row = vec![Value::Int(1.into()), Value::Int(2.into())];
        let scalars = HashMap::new();
        let formats = FormatRegistry::default();
        let c = ctx(&columns, &row, &scalars, &formats);
        let err = eval(&e, &c).unwrap_err();
        assert_eq!(err.code, codes::SANS_RUNTIME_SQL_AMBIGUOUS_COLUMN);
        let _ = Loc::single("x", 1);
    }

    #[test]
    fn put_maps_value_or_falls_back_to_other() {
        let e = parse_expr("put(v, \"status\")", "t.sans", 1).unwrap();
        let columns = vec!["v".to_string()];
        let row = vec![Value::Int(1.into())];
        let scalars = HashMap::new();
        let mut formats = FormatRegistry::default();
        let mut mapping = BTreeMap::new();
        mapping.insert("1".to_string(), "high".to_string());
        formats.register("status".to_string(), FormatDef { mapping, other: Some("unknown".to_string()) });
        let c = ctx(&columns, &row, &scalars, &formats);
        assert_eq!(eval(&e, &c).unwrap(), Value::String("high".to_string()));
    }

    #[test]
    fn if_call_picks_branch() {
        let e = parse_expr("if(a > 1, 10, 20)", "t.sans", 1).unwrap();
        let columns = vec!["a".to_string()];
        let row = vec![Value::Int(5.into())];
        let scalars = HashMap::new();
        let formats = FormatRegistry::default();
        let c = ctx(&columns, &row, &scalars, &formats);
        assert_eq!(eval(&e, &c).unwrap(), Value::Int(10.into()));
    }
}
