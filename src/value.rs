//! Canonical value and type model (spec §3).

use std::cmp::Ordering;
use std::fmt;

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use crate::decimal::Decimal;
use crate::error::{codes, Diagnostic};

/// A runtime value. Exactly one of these kinds at any time — there is no
/// implicit coercion at the value level, only at evaluation sites that
/// explicitly call [unify] or comparison helpers.
#[derive(Debug, Clone, PartialEq, EnumAsInner, strum::AsRefStr)]
pub enum Value {
    Null,
    Bool(bool),
    Int(num_bigint::BigInt),
    Decimal(Decimal),
    String(String),
}

impl Value {
    pub fn type_tag(&self) -> Type {
        match self {
            Value::Null => Type::Null,
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::Decimal(_) => Type::Decimal,
            Value::String(_) => Type::String,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness used by `filter` and `if`: only `Bool(true)` is true,
    /// everything else (including NULL) is false.
    pub fn is_truthy(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    /// Reads a raw CSV token into a value, given a target column type.
    /// Empty/whitespace tokens are NULL (spec §4.6).
    pub fn from_csv_token(token: &str, expected: Type) -> Result<Value, String> {
        if token.trim().is_empty() {
            return Ok(Value::Null);
        }
        match expected {
            Type::String => Ok(Value::String(token.to_string())),
            Type::Bool => match token.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err("invalid_bool".to_string()),
            },
            Type::Int => {
                if is_leading_zero_int_like(token.trim()) {
                    return Err("invalid_int".to_string());
                }
                token
                    .trim()
                    .parse::<num_bigint::BigInt>()
                    .map(Value::Int)
                    .map_err(|_| "invalid_int".to_string())
            }
            Type::Decimal => Decimal::parse(token.trim())
                .map(Value::Decimal)
                .map_err(|_| "invalid_decimal".to_string()),
            Type::Null | Type::Unknown => Ok(Value::String(token.to_string())),
        }
    }

    /// Parses a bare, untyped token the way the front-end lexer would: a
    /// leading-zero integer-looking token is STRING not INT (spec §3).
    pub fn infer_from_token(token: &str) -> Value {
        let t = token.trim();
        if t.is_empty() {
            return Value::Null;
        }
        if is_leading_zero_int_like(t) {
            return Value::String(token.to_string());
        }
        if let Ok(i) = t.parse::<num_bigint::BigInt>() {
            return Value::Int(i);
        }
        if let Ok(d) = Decimal::parse(t) {
            if t.contains('.') {
                return Value::Decimal(d);
            }
        }
        Value::String(token.to_string())
    }
}

fn is_leading_zero_int_like(t: &str) -> bool {
    let digits = t.strip_prefix('-').unwrap_or(t);
    digits.len() > 1 && digits.starts_with('0') && digits.chars().all(|c| c.is_ascii_digit())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

/// Total order used by `sort`: NULL compares equal to NULL and is handled
/// specially by the sort operator (first ascending, last descending); this
/// only orders non-null values of the *same or unifiable* types.
impl Value {
    pub fn compare(&self, other: &Value) -> Result<Ordering, Diagnostic> {
        match (self, other) {
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => Ok(a.cmp(b)),
            (Value::Int(a), Value::Decimal(b)) => Ok(Decimal::from_bigint(a).cmp(b)),
            (Value::Decimal(a), Value::Int(b)) => Ok(a.cmp(&Decimal::from_bigint(b))),
            (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            _ => Err(Diagnostic::new(
                codes::SANS_RUNTIME_TYPE,
                format!(
                    "cannot compare {} and {}",
                    self.type_tag(),
                    other.type_tag()
                ),
            )),
        }
    }
}

/// Type lattice tags (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Null,
    Bool,
    Int,
    Decimal,
    String,
    Unknown,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Unification context: some rules only apply in assignment / if-branch
/// position (`NULL ⊔ T = T`); elsewhere NULL does not unify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnifyCtx {
    Assignment,
    Strict,
}

/// `unify(a, b, ctx)` per spec §3.
pub fn unify(a: Type, b: Type, ctx: UnifyCtx) -> Result<Type, Diagnostic> {
    use Type::*;
    if a == Unknown || b == Unknown {
        return Err(Diagnostic::new(
            codes::E_TYPE_UNKNOWN,
            "operand type is unknown and cannot be unified",
        ));
    }
    if a == b {
        return Ok(a);
    }
    if ctx == UnifyCtx::Assignment {
        if a == Null {
            return Ok(b);
        }
        if b == Null {
            return Ok(a);
        }
    }
    match (a, b) {
        (Int, Decimal) | (Decimal, Int) => Ok(Decimal),
        _ => Err(Diagnostic::new(
            codes::SANS_RUNTIME_TYPE,
            format!("cannot unify types {a} and {b}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_zero_is_string() {
        let v = Value::infer_from_token("0123");
        assert_eq!(v, Value::String("0123".to_string()));
    }

    #[test]
    fn plain_int_is_int() {
        let v = Value::infer_from_token("42");
        assert!(v.is_int());
    }

    #[test]
    fn empty_token_is_null() {
        assert_eq!(Value::infer_from_token("   "), Value::Null);
    }

    #[test]
    fn unify_int_decimal_is_decimal() {
        assert_eq!(
            unify(Type::Int, Type::Decimal, UnifyCtx::Strict).unwrap(),
            Type::Decimal
        );
    }

    #[test]
    fn unify_null_with_t_in_assignment_ctx() {
        assert_eq!(
            unify(Type::Null, Type::String, UnifyCtx::Assignment).unwrap(),
            Type::String
        );
    }

    #[test]
    fn unify_unknown_is_rejected() {
        let err = unify(Type::Unknown, Type::Int, UnifyCtx::Strict).unwrap_err();
        assert_eq!(err.code, codes::E_TYPE_UNKNOWN);
    }
}
