//! `proc format` lowering (spec §4.4): collects `value NAME ... ;` lines
//! into a `format{name, kind, mapping, other?}` step.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use crate::ast::stmt::{Block, StatementKind};
use crate::error::{codes, Diagnostic};
use crate::ir::step::{Op, Step};

static VALUE_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^value\s+([A-Za-z_][A-Za-z0-9_]*)\s*(.*)$").unwrap());
static MAPPING_ENTRY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)"?([^"=]+?)"?\s*=\s*"([^"]*)""#).unwrap());
static OTHER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?is)other\s*=\s*"([^"]*)""#).unwrap());

/// Lowers a `proc format; value NAME a='x' b='y' other='z'; run;` block into
/// zero or more `format` steps (one per `value` statement in the block).
pub fn lower_format_block(block: &Block) -> Result<Vec<Step>, Diagnostic> {
    let mut steps = Vec::new();
    let mut pending: Option<(String, BTreeMap<String, String>, Option<String>)> = None;

    let flush = |pending: &mut Option<(String, BTreeMap<String, String>, Option<String>)>,
                 steps: &mut Vec<Step>,
                 loc: &crate::error::Loc| {
        if let Some((name, mapping, other)) = pending.take() {
            let mut params = serde_json::Map::new();
            params.insert("name".to_string(), json!(name));
            params.insert("kind".to_string(), json!("value"));
            params.insert("mapping".to_string(), json!(mapping));
            if let Some(o) = other {
                params.insert("other".to_string(), json!(o));
            }
            steps.push(Step {
                id: format!("format_{name}"),
                op: Op::Format,
                inputs: vec![],
                outputs: vec![],
                params: serde_json::Value::Object(params),
                loc: loc.clone(),
                transform_id: None,
                transform_class_id: None,
                step_id: None,
            });
        }
    };

    for stmt in &block.statements {
        let text = match &stmt.kind {
            StatementKind::Header { text } => text.as_str(),
            StatementKind::Raw { text } => text.as_str(),
            StatementKind::Run => {
                flush(&mut pending, &mut steps, &stmt.loc);
                continue;
            }
            _ => continue,
        };

        if let Some(caps) = VALUE_HEADER_RE.captures(text) {
            flush(&mut pending, &mut steps, &stmt.loc);
            let name = caps[1].to_string();
            let rest = caps[2].to_string();
            let mut mapping = BTreeMap::new();
            let mut other = None;
            for entry in MAPPING_ENTRY_RE.captures_iter(&rest) {
                let key = entry[1].trim();
                if key.eq_ignore_ascii_case("other") {
                    continue;
                }
                mapping.insert(key.to_string(), entry[2].to_string());
            }
            if let Some(o) = OTHER_RE.captures(&rest) {
                other = Some(o[1].to_string());
            }
            pending = Some((name, mapping, other));
            continue;
        }

        if let Some((_, mapping, other)) = pending.as_mut() {
            for entry in MAPPING_ENTRY_RE.captures_iter(text) {
                let key = entry[1].trim();
                if key.eq_ignore_ascii_case("other") {
                    continue;
                }
                mapping.insert(key.to_string(), entry[2].to_string());
            }
            if let Some(o) = OTHER_RE.captures(text) {
                *other = Some(o[1].to_string());
            }
            continue;
        }

        return Err(Diagnostic::new(
            codes::SANS_PARSE_FORMAT_UNSUPPORTED_STATEMENT,
            format!("unsupported proc format statement: {text}"),
        )
        .with_loc(stmt.loc.clone()));
    }
    flush(&mut pending, &mut steps, &block.loc);
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::segment::{segment_blocks, segment_statements};
    use crate::ast::stmt::parse_block;

    #[test]
    fn value_statement_collects_mapping() {
        let stmts = segment_statements(
            r#"proc format; value status 1="high" 2="low" other="unknown"; run;"#,
            "t.sans",
        );
        let raw = segment_blocks(stmts).remove(0);
        let block = parse_block(raw, true).unwrap();
        let steps = lower_format_block(&block).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].params["name"], "status");
        assert_eq!(steps[0].params["mapping"]["1"], "high");
        assert_eq!(steps[0].params["other"], "unknown");
        assert!(steps[0].params["mapping"].get("other").is_none());
    }
}
