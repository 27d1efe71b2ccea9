//! Expression parser and canonical printer (spec §4.1, §8 invariant 1).
//!
//! Hand-rolled recursive descent over the token stream from
//! [crate::ast::lexer], rather than a chumsky grammar: the strict operator
//! contract is small and fixed, and a direct recursive descent parser makes
//! the precedence ladder (`or` < `and` < `not` < comparisons < `+ -` < `* /`)
//! read directly off the function call chain.

use num_bigint::BigInt;

use crate::ast::expr::{BinOp, BoolOp, Expr, ExprKind, UnOp, CALL_WHITELIST};
use crate::ast::lexer::{lex, Kw, LineIndex, Spanned, Token};
use crate::decimal::Decimal;
use crate::error::{codes, Diagnostic, Loc};
use crate::value::Value;

/// Parses a single expression. `file` and `line` anchor the resulting
/// [Loc]s — expressions are always parsed as part of a larger statement
/// that already knows its own line.
pub fn parse_expr(source: &str, file: &str, line: usize) -> Result<Expr, Diagnostic> {
    let tokens = lex(source).map_err(|errs| {
        Diagnostic::new(
            codes::E_BAD_EXPR,
            format!("lex error in expression {source:?}: {errs:?}"),
        )
        .with_loc(Loc::single(file, line))
    })?;
    let idx = LineIndex::new(source);
    let mut p = Parser {
        tokens: &tokens,
        pos: 0,
        file,
        base_line: line,
        idx: &idx,
    };
    let e = p.parse_or()?;
    p.expect_end()?;
    Ok(e)
}

struct Parser<'a> {
    tokens: &'a [Spanned<Token>],
    pos: usize,
    file: &'a str,
    base_line: usize,
    idx: &'a LineIndex,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn loc_at(&self, pos: usize) -> Loc {
        let line = self
            .tokens
            .get(pos)
            .map(|(_, span)| self.base_line + self.idx.line_of_offset(span.start) - 1)
            .unwrap_or(self.base_line);
        Loc::single(self.file, line)
    }

    fn here(&self) -> Loc {
        self.loc_at(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat_ctrl(&mut self, s: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ctrl(c)) if c == s) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Kw) -> bool {
        if matches!(self.peek(), Some(Token::Kw(k)) if *k == kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_end(&self) -> Result<(), Diagnostic> {
        if self.pos != self.tokens.len() {
            return Err(Diagnostic::new(
                codes::E_BAD_EXPR,
                format!("unexpected trailing token {:?}", self.peek()),
            )
            .with_loc(self.here()));
        }
        Ok(())
    }

    fn err_here(&self, msg: impl Into<String>) -> Diagnostic {
        Diagnostic::new(codes::E_BAD_EXPR, msg).with_loc(self.here())
    }

    // or_expr := and_expr (OR and_expr)*
    fn parse_or(&mut self) -> Result<Expr, Diagnostic> {
        let loc = self.here();
        let mut args = vec![self.parse_and()?];
        while self.eat_kw(Kw::Or) {
            args.push(self.parse_and()?);
        }
        Ok(if args.len() == 1 {
            args.pop().unwrap()
        } else {
            Expr::new(ExprKind::BoolOp { op: BoolOp::Or, args }, loc)
        })
    }

    // and_expr := not_expr (AND not_expr)*
    fn parse_and(&mut self) -> Result<Expr, Diagnostic> {
        let loc = self.here();
        let mut args = vec![self.parse_not()?];
        while self.eat_kw(Kw::And) {
            args.push(self.parse_not()?);
        }
        Ok(if args.len() == 1 {
            args.pop().unwrap()
        } else {
            Expr::new(ExprKind::BoolOp { op: BoolOp::And, args }, loc)
        })
    }

    // not_expr := NOT not_expr | cmp_expr
    fn parse_not(&mut self) -> Result<Expr, Diagnostic> {
        let loc = self.here();
        if self.eat_kw(Kw::Not) {
            let arg = self.parse_not()?;
            return Ok(Expr::new(
                ExprKind::UnOp { op: UnOp::Not, arg: Box::new(arg) },
                loc,
            ));
        }
        self.parse_cmp()
    }

    // cmp_expr := add_expr ( (== | != | < | <= | > | >= | '=') add_expr )?
    // Bare '=' is rejected with E_BAD_EXPR (spec's strict contract only
    // accepts '==' for comparison); a single comparison per expression,
    // matching the spec's contract (no chained `a < b < c`).
    fn parse_cmp(&mut self) -> Result<Expr, Diagnostic> {
        let loc = self.here();
        let lhs = self.parse_add()?;
        let op = match self.peek() {
            Some(Token::Ctrl(c)) if c == "==" => Some(BinOp::Eq),
            Some(Token::Ctrl(c)) if c == "!=" => Some(BinOp::Ne),
            Some(Token::Ctrl(c)) if c == "<" => Some(BinOp::Lt),
            Some(Token::Ctrl(c)) if c == "<=" => Some(BinOp::Le),
            Some(Token::Ctrl(c)) if c == ">" => Some(BinOp::Gt),
            Some(Token::Ctrl(c)) if c == ">=" => Some(BinOp::Ge),
            Some(Token::Ctrl(c)) if c == "=" => {
                return Err(self.err_here("bare '=' is not a comparison operator, use '=='"));
            }
            _ => None,
        };
        let Some(op) = op else { return Ok(lhs) };
        self.bump();
        let rhs = self.parse_add()?;
        Ok(Expr::new(
            ExprKind::BinOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
            loc,
        ))
    }

    // add_expr := mul_expr ( ('+' | '-') mul_expr )*
    fn parse_add(&mut self) -> Result<Expr, Diagnostic> {
        let loc = self.here();
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Ctrl(c)) if c == "+" => BinOp::Add,
                Some(Token::Ctrl(c)) if c == "-" => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_mul()?;
            lhs = Expr::new(
                ExprKind::BinOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                loc.clone(),
            );
        }
        Ok(lhs)
    }

    // mul_expr := unary_expr ( ('*' | '/') unary_expr )*
    fn parse_mul(&mut self) -> Result<Expr, Diagnostic> {
        let loc = self.here();
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Ctrl(c)) if c == "*" => BinOp::Mul,
                Some(Token::Ctrl(c)) if c == "/" => BinOp::Div,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Expr::new(
                ExprKind::BinOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                loc.clone(),
            );
        }
        Ok(lhs)
    }

    // unary_expr := '-' unary_expr | term
    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        let loc = self.here();
        if self.eat_ctrl("-") {
            let arg = self.parse_unary()?;
            return Ok(Expr::new(
                ExprKind::UnOp { op: UnOp::Neg, arg: Box::new(arg) },
                loc,
            ));
        }
        self.parse_term()
    }

    // term := literal | dotted-column | whitelisted-call | '(' or_expr ')'
    fn parse_term(&mut self) -> Result<Expr, Diagnostic> {
        let loc = self.here();
        if self.eat_ctrl("(") {
            let inner = self.parse_or()?;
            if !self.eat_ctrl(")") {
                return Err(self.err_here("expected closing ')'"));
            }
            return Ok(inner);
        }
        match self.bump() {
            Some(Token::Int(s)) => {
                let v: BigInt = s.parse().map_err(|_| self.err_here("invalid integer literal"))?;
                Ok(Expr::new(ExprKind::Lit(Value::Int(v)), loc))
            }
            Some(Token::Decimal(s)) => {
                let v = Decimal::parse(&s).map_err(|_| self.err_here("invalid decimal literal"))?;
                Ok(Expr::new(ExprKind::Lit(Value::Decimal(v)), loc))
            }
            Some(Token::Str(s)) => Ok(Expr::new(ExprKind::Lit(Value::String(s)), loc)),
            Some(Token::Kw(Kw::True)) => Ok(Expr::new(ExprKind::Lit(Value::Bool(true)), loc)),
            Some(Token::Kw(Kw::False)) => Ok(Expr::new(ExprKind::Lit(Value::Bool(false)), loc)),
            Some(Token::Kw(Kw::Null)) => Ok(Expr::new(ExprKind::Lit(Value::Null), loc)),
            Some(Token::Ident(name)) => self.parse_ident_tail(name, loc),
            other => Err(self.err_here(format!("unexpected token {other:?}"))),
        }
    }

    /// An identifier can continue as a dotted column (`a.b.c`) or, if
    /// immediately followed by `(`, a whitelisted function call.
    fn parse_ident_tail(&mut self, first: String, loc: Loc) -> Result<Expr, Diagnostic> {
        if self.eat_ctrl("(") {
            if !CALL_WHITELIST.contains(&first.as_str()) {
                return Err(self.err_here(format!("unknown function '{first}'")));
            }
            let mut args = Vec::new();
            if !self.eat_ctrl(")") {
                loop {
                    args.push(self.parse_or()?);
                    if self.eat_ctrl(",") {
                        continue;
                    }
                    break;
                }
                if !self.eat_ctrl(")") {
                    return Err(self.err_here("expected closing ')' in call"));
                }
            }
            return Ok(Expr::new(ExprKind::Call { name: first, args }, loc));
        }
        let mut name = first;
        while self.eat_ctrl(".") {
            match self.bump() {
                Some(Token::Ident(part)) => {
                    name.push('.');
                    name.push_str(&part);
                }
                other => return Err(self.err_here(format!("expected identifier after '.', got {other:?}"))),
            }
        }
        Ok(Expr::new(ExprKind::Col(name), loc))
    }
}

/// Canonical printer. Satisfies `parse(print(parse(s))) == parse(s)`: every
/// node is printed fully parenthesized around its operator so the textual
/// form is independent of the original source's own parenthesization and
/// whitespace.
pub fn print_expr(e: &Expr) -> String {
    match &e.kind {
        ExprKind::Lit(Value::String(s)) => format!("'{}'", escape_string(s)),
        ExprKind::Lit(v) => match v {
            Value::Null => "null".to_string(),
            Value::Bool(true) => "true".to_string(),
            Value::Bool(false) => "false".to_string(),
            _ => v.to_string(),
        },
        ExprKind::Col(name) => name.clone(),
        ExprKind::UnOp { op: UnOp::Not, arg } => format!("not {}", print_expr(arg)),
        ExprKind::UnOp { op: UnOp::Neg, arg } => format!("-({})", print_expr(arg)),
        ExprKind::BinOp { op, lhs, rhs } => {
            format!("({} {} {})", print_expr(lhs), op.as_ref(), print_expr(rhs))
        }
        ExprKind::BoolOp { op, args } => {
            let parts: Vec<String> = args.iter().map(print_expr).collect();
            format!("({})", parts.join(&format!(" {} ", op.as_ref())))
        }
        ExprKind::Call { name, args } => {
            let parts: Vec<String> = args.iter().map(print_expr).collect();
            format!("{name}({})", parts.join(", "))
        }
    }
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Expr {
        parse_expr(s, "t.sans", 1).unwrap()
    }

    #[test]
    fn precedence_mul_binds_tighter_than_add() {
        let e = p("1 + 2 * 3");
        assert_eq!(print_expr(&e), "(1 + (2 * 3))");
    }

    #[test]
    fn not_wraps_full_comparison() {
        let e = p("not a == 1");
        assert_eq!(print_expr(&e), "not (a == 1)");
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let e = p("a or b and c");
        match &e.kind {
            ExprKind::BoolOp { op: BoolOp::Or, args } => assert_eq!(args.len(), 2),
            other => panic!("expected top-level or, got {other:?}"),
        }
    }

    #[test]
    fn same_op_chain_is_flattened_nary() {
        let e = p("a and b and c");
        match &e.kind {
            ExprKind::BoolOp { op: BoolOp::And, args } => assert_eq!(args.len(), 3),
            other => panic!("expected flattened and, got {other:?}"),
        }
    }

    #[test]
    fn dotted_column_reference() {
        let e = p("first.x");
        assert_eq!(e.kind, ExprKind::Col("first.x".to_string()));
    }

    #[test]
    fn whitelisted_call_parses() {
        let e = p("coalesce(a, 0)");
        assert!(matches!(e.kind, ExprKind::Call { .. }));
    }

    #[test]
    fn non_whitelisted_call_is_rejected() {
        let err = parse_expr("foo(a)", "t.sans", 1).unwrap_err();
        assert_eq!(err.code, codes::E_BAD_EXPR);
    }

    #[test]
    fn bare_equals_is_rejected() {
        let err = parse_expr("a = 1", "t.sans", 1).unwrap_err();
        assert_eq!(err.code, codes::E_BAD_EXPR);
    }

    #[test]
    fn parenthesized_grouping_overrides_precedence() {
        let e = p("(1 + 2) * 3");
        assert_eq!(print_expr(&e), "((1 + 2) * 3)");
    }

    #[test]
    fn round_trip_law_holds() {
        for src in ["1 + 2 * 3", "not a == 1 and b != 2", "coalesce(x, 'y') or z"] {
            let once = p(src);
            let printed = print_expr(&once);
            let twice = parse_expr(&printed, "t.sans", 1).unwrap();
            assert_eq!(print_expr(&once), print_expr(&twice));
        }
    }
}
