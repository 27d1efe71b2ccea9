//! Deterministic CSV schema inference for `--schema-lock` generation
//! (ported from `schema_infer.py`). Scans up to `max_rows`; infers one
//! type per column via a monotonic widening rule. Empty/whitespace tokens
//! are null and do not participate in inference.

use crate::value::Type;

pub const DEFAULT_INFER_MAX_ROWS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferredColumn {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct InferResult {
    pub columns: Vec<InferredColumn>,
    pub rows_scanned: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Null,
    String,
    Decimal,
    Int,
    Bool,
}

fn token_requires_string(t: &str) -> bool {
    if t.is_empty() {
        return false;
    }
    if is_leading_zero_digits(t) {
        return true;
    }
    if t.eq_ignore_ascii_case("true") || t.eq_ignore_ascii_case("false") {
        return false;
    }
    if t.parse::<i64>().is_ok() || t.parse::<num_bigint::BigInt>().is_ok() {
        return false;
    }
    crate::decimal::Decimal::parse(t).is_err()
}

fn is_leading_zero_digits(t: &str) -> bool {
    let digits = t.strip_prefix('-').unwrap_or(t);
    digits.len() > 1 && digits.starts_with('0') && digits.chars().all(|c| c.is_ascii_digit())
}

fn token_kind(token: &str) -> TokenKind {
    let t = token.trim();
    if t.is_empty() {
        return TokenKind::Null;
    }
    if t.eq_ignore_ascii_case("true") || t.eq_ignore_ascii_case("false") {
        return TokenKind::Bool;
    }
    if token_requires_string(t) {
        return TokenKind::String;
    }
    if t.contains('.') || t.to_ascii_lowercase().contains('e') {
        return if crate::decimal::Decimal::parse(t).is_ok() { TokenKind::Decimal } else { TokenKind::String };
    }
    if t.parse::<num_bigint::BigInt>().is_ok() {
        return TokenKind::Int;
    }
    if crate::decimal::Decimal::parse(t).is_ok() {
        return TokenKind::Decimal;
    }
    TokenKind::String
}

fn infer_column_type(kinds: &[TokenKind]) -> Type {
    let non_null: Vec<TokenKind> = kinds.iter().copied().filter(|k| *k != TokenKind::Null).collect();
    if non_null.is_empty() {
        return Type::String;
    }
    if non_null.contains(&TokenKind::String) {
        return Type::String;
    }
    if non_null.contains(&TokenKind::Decimal) {
        return Type::Decimal;
    }
    if non_null.contains(&TokenKind::Int) {
        return Type::Int;
    }
    if non_null.iter().all(|k| *k == TokenKind::Bool) {
        return Type::Bool;
    }
    Type::String
}

/// Infers column names and types from raw CSV text (already normalized to
/// LF line endings). Mirrors `infer_csv_schema`'s reader-based scan.
pub fn infer_csv_schema(content: &str, max_rows: usize) -> InferResult {
    let mut reader = csv::ReaderBuilder::new().has_headers(false).from_reader(content.as_bytes());
    let mut records = reader.records();
    let headers = match records.next() {
        Some(Ok(r)) => r,
        _ => return InferResult { columns: Vec::new(), rows_scanned: 0, truncated: false },
    };
    if headers.is_empty() {
        return InferResult { columns: Vec::new(), rows_scanned: 0, truncated: false };
    }
    let column_names: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let h = h.trim();
            if h.is_empty() {
                format!("_col{i}")
            } else {
                h.to_string()
            }
        })
        .collect();

    let num_cols = column_names.len();
    let mut column_kinds: Vec<Vec<TokenKind>> = vec![Vec::new(); num_cols];
    let mut rows_scanned = 0usize;
    let mut truncated = false;

    for record in records {
        if rows_scanned >= max_rows {
            truncated = true;
            break;
        }
        let record = match record {
            Ok(r) => r,
            Err(_) => break,
        };
        for (i, kinds) in column_kinds.iter_mut().enumerate() {
            let token = record.get(i).unwrap_or("");
            kinds.push(token_kind(token));
        }
        rows_scanned += 1;
    }

    let columns = column_names
        .into_iter()
        .zip(column_kinds.iter().map(|k| infer_column_type(k)))
        .map(|(name, ty)| InferredColumn { name, ty })
        .collect();

    InferResult { columns, rows_scanned, truncated }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_zero_column_infers_string() {
        let r = infer_csv_schema("a\n01\n02\n", DEFAULT_INFER_MAX_ROWS);
        assert_eq!(r.columns[0].ty, Type::String);
    }

    #[test]
    fn mixed_int_and_decimal_widens_to_decimal() {
        let r = infer_csv_schema("a\n1\n2.5\n", DEFAULT_INFER_MAX_ROWS);
        assert_eq!(r.columns[0].ty, Type::Decimal);
    }

    #[test]
    fn all_bool_tokens_infer_bool() {
        let r = infer_csv_schema("a\ntrue\nfalse\n", DEFAULT_INFER_MAX_ROWS);
        assert_eq!(r.columns[0].ty, Type::Bool);
    }

    #[test]
    fn empty_column_defaults_to_string() {
        let r = infer_csv_schema("a\n\n\n", DEFAULT_INFER_MAX_ROWS);
        assert_eq!(r.columns[0].ty, Type::String);
    }

    #[test]
    fn truncates_at_max_rows() {
        let content = "a\n".to_string() + &"1\n".repeat(5);
        let r = infer_csv_schema(&content, 3);
        assert!(r.truncated);
        assert_eq!(r.rows_scanned, 3);
    }
}
