//! `proc sql` lowering to `sql_select` (spec §4.4).
//!
//! Supports exactly one shape: `select LIST from TABLE [alias] [JOIN_TYPE
//! join TABLE [alias] on COND]* [where COND] [group by COLS];`. Anything
//! else — sub-selects, implicit (comma) joins, an untyped join — is refused
//! with `SANS_PARSE_SQL_UNSUPPORTED_FORM`.

use serde_json::json;

use crate::error::{codes, Diagnostic, Loc};
use crate::ir::step::{Op, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    fn as_str(self) -> &'static str {
        match self {
            JoinKind::Inner => "inner",
            JoinKind::Left => "left",
            JoinKind::Right => "right",
            JoinKind::Full => "full",
        }
    }
}

/// Lowers the raw SQL body text of a `proc sql` block (everything between
/// the header and `quit;`) into a single `sql_select` step.
pub fn lower_sql_select(body: &str, loc: &Loc) -> Result<Step, Diagnostic> {
    let body = body.trim().trim_end_matches(';').trim();
    let lower = body.to_ascii_lowercase();

    if !lower.starts_with("select") {
        return Err(Diagnostic::new(
            codes::SANS_PARSE_SQL_UNSUPPORTED_FORM,
            "only 'select ... from ...' statements are supported",
        )
        .with_loc(loc.clone()));
    }
    if lower.contains("(select") {
        return Err(Diagnostic::new(
            codes::SANS_PARSE_SQL_DETECTED,
            "sub-selects are not supported",
        )
        .with_loc(loc.clone()));
    }

    let from_idx = find_keyword(&lower, "from")
        .ok_or_else(|| unsupported("missing FROM clause", loc))?;
    let select_list = body[6..from_idx].trim();

    let where_idx = find_keyword(&lower, "where");
    let group_idx = find_keyword(&lower, "group by");
    let tail_idx = where_idx.or(group_idx).unwrap_or(body.len());
    let from_and_joins = body[from_idx + 4..tail_idx].trim();

    if from_and_joins.contains(',') {
        return Err(unsupported("implicit comma joins are not supported", loc));
    }

    let (from_table, joins) = parse_from_and_joins(from_and_joins, loc)?;

    let where_clause = where_idx.map(|wi| {
        let end = group_idx.unwrap_or(body.len());
        body[wi + 5..end].trim().to_string()
    });

    let group_by: Vec<String> = group_idx
        .map(|gi| {
            let text = &body[gi + 8..];
            text.split(',').map(|s| s.trim().to_string()).collect()
        })
        .unwrap_or_default();

    let select_cols: Vec<String> = select_list.split(',').map(|s| s.trim().to_string()).collect();

    if !group_by.is_empty() {
        let non_aggregated: Vec<&String> = select_cols
            .iter()
            .filter(|c| !is_aggregate_expr(c))
            .collect();
        for col in &non_aggregated {
            let bare = col.rsplit(" as ").next().unwrap_or(col).trim();
            if !group_by.iter().any(|g| g == bare || g.ends_with(&format!(".{bare}"))) {
                return Err(Diagnostic::new(
                    codes::SANS_PARSE_SQL_UNSUPPORTED_FORM,
                    format!("GROUP BY must include non-aggregated column '{bare}'"),
                )
                .with_loc(loc.clone()));
            }
        }
    }

    let mut params = serde_json::Map::new();
    params.insert("select".to_string(), json!(select_cols));
    params.insert("from".to_string(), json!(from_table));
    params.insert(
        "joins".to_string(),
        json!(joins
            .iter()
            .map(|(kind, table, on)| json!({"kind": kind.as_str(), "table": table, "on": on}))
            .collect::<Vec<_>>()),
    );
    if let Some(w) = where_clause {
        params.insert("where".to_string(), json!(w));
    }
    if !group_by.is_empty() {
        params.insert("group_by".to_string(), json!(group_by));
    }

    let mut inputs = vec![from_table.clone()];
    inputs.extend(joins.iter().map(|(_, t, _)| t.clone()));

    Ok(Step {
        id: "sql_select".to_string(),
        op: Op::SqlSelect,
        inputs,
        outputs: vec![],
        params: serde_json::Value::Object(params),
        loc: loc.clone(),
        transform_id: None,
        transform_class_id: None,
        step_id: None,
    })
}

fn parse_from_and_joins(
    text: &str,
    loc: &Loc,
) -> Result<(String, Vec<(JoinKind, String, String)>), Diagnostic> {
    let lower = text.to_ascii_lowercase();
    let mut cut = lower.len();
    for kw in ["inner join", "left join", "right join", "full join", " join "] {
        if let Some(i) = lower.find(kw) {
            cut = cut.min(i);
        }
    }
    let from_table = text[..cut].trim().to_string();
    if from_table.is_empty() {
        return Err(unsupported("missing FROM table", loc));
    }

    let mut joins = Vec::new();
    let mut rest = &text[cut..];
    let mut rest_lower = rest.to_ascii_lowercase();
    loop {
        let (kind, kw_len) = if rest_lower.starts_with("inner join") {
            (JoinKind::Inner, "inner join".len())
        } else if rest_lower.starts_with("left join") {
            (JoinKind::Left, "left join".len())
        } else if rest_lower.starts_with("right join") {
            (JoinKind::Right, "right join".len())
        } else if rest_lower.starts_with("full join") {
            (JoinKind::Full, "full join".len())
        } else if rest_lower.starts_with("join") || rest_lower.trim_start().starts_with("join") {
            return Err(unsupported("join must be explicitly typed (inner|left|right|full)", loc));
        } else if rest_lower.trim().is_empty() {
            break;
        } else {
            return Err(unsupported("unexpected trailing tokens after FROM", loc));
        };

        rest = rest[kw_len..].trim_start();
        rest_lower = rest.to_ascii_lowercase();
        let on_idx = rest_lower
            .find(" on ")
            .ok_or_else(|| unsupported("join missing ON clause", loc))?;
        let table = rest[..on_idx].trim().to_string();

        let mut next_cut = rest.len();
        let after_on = &rest_lower[on_idx + 4..];
        for kw in ["inner join", "left join", "right join", "full join"] {
            if let Some(i) = after_on.find(kw) {
                next_cut = next_cut.min(on_idx + 4 + i);
            }
        }
        let on = rest[on_idx + 4..next_cut].trim().to_string();
        joins.push((kind, table, on));

        rest = &rest[next_cut..];
        rest_lower = rest.to_ascii_lowercase();
        if rest_lower.trim().is_empty() {
            break;
        }
    }

    Ok((from_table, joins))
}

fn is_aggregate_expr(col: &str) -> bool {
    let lower = col.to_ascii_lowercase();
    ["count(", "sum(", "avg(", "min(", "max("]
        .iter()
        .any(|f| lower.trim_start().starts_with(f))
}

fn find_keyword(haystack_lower: &str, kw: &str) -> Option<usize> {
    // Word-boundary-ish search: keyword must be surrounded by whitespace
    // (or string bounds) so e.g. "where" doesn't match inside "somewhere".
    let bytes = haystack_lower.as_bytes();
    let kw_bytes = kw.as_bytes();
    let mut i = 0;
    while let Some(found) = haystack_lower[i..].find(kw) {
        let start = i + found;
        let end = start + kw_bytes.len();
        let before_ok = start == 0 || bytes[start - 1].is_ascii_whitespace();
        let after_ok = end >= bytes.len() || bytes[end].is_ascii_whitespace();
        if before_ok && after_ok {
            return Some(start);
        }
        i = start + 1;
    }
    None
}

fn unsupported(msg: impl Into<String>, loc: &Loc) -> Diagnostic {
    Diagnostic::new(codes::SANS_PARSE_SQL_UNSUPPORTED_FORM, msg).with_loc(loc.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_inner_join_lowers() {
        let step = lower_sql_select(
            "select t1.id, t1.val, t2.extra from t1 inner join t2 on t1.id = t2.id",
            &Loc::single("t.sans", 1),
        )
        .unwrap();
        assert_eq!(step.params["from"], "t1");
        assert_eq!(step.params["joins"][0]["kind"], "inner");
    }

    #[test]
    fn untyped_join_is_refused() {
        let err = lower_sql_select(
            "select a from t1 join t2 on t1.id = t2.id",
            &Loc::single("t.sans", 1),
        )
        .unwrap_err();
        assert_eq!(err.code, codes::SANS_PARSE_SQL_UNSUPPORTED_FORM);
    }

    #[test]
    fn subselect_is_detected_and_refused() {
        let err = lower_sql_select(
            "select a from (select b from t1) t2",
            &Loc::single("t.sans", 1),
        )
        .unwrap_err();
        assert_eq!(err.code, codes::SANS_PARSE_SQL_DETECTED);
    }

    #[test]
    fn group_by_must_include_bare_selected_column() {
        let err = lower_sql_select(
            "select a, b, sum(c) from t1 group by a",
            &Loc::single("t.sans", 1),
        )
        .unwrap_err();
        assert_eq!(err.code, codes::SANS_PARSE_SQL_UNSUPPORTED_FORM);
    }

    #[test]
    fn where_clause_captured() {
        let step = lower_sql_select(
            "select a from t1 where a > 1",
            &Loc::single("t.sans", 1),
        )
        .unwrap();
        assert_eq!(step.params["where"], "a > 1");
    }
}
