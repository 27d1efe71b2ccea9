//! Bipartite step/table dependency graph artifact (spec §4.8).
//!
//! Nodes are either a step (`transform_class_id` + `payload_sha256 =
//! transform_id`) or a table (`payload_sha256` over its bare name, since a
//! table node carries no params of its own). Edges are `consumes` (table →
//! step) and `produces` (step → table), sorted by `(src, dst, kind)` so the
//! artifact is insensitive to source whitespace/comments — only wiring and
//! params affect it.

use serde_json::{json, Value as Json};

use crate::ir::canon::sha256_of_json;
use crate::ir::step::IRDoc;

pub fn build_graph(doc: &IRDoc) -> Json {
    let mut nodes: Vec<Json> = Vec::new();
    let mut edges: Vec<(String, String, &'static str)> = Vec::new();
    let mut table_nodes: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();

    for step in doc.real_steps() {
        let step_id = step.step_id.clone().unwrap_or_else(|| step.id.clone());
        let payload = step.transform_id.clone().unwrap_or_else(|| sha256_of_json(&json!({"op": step.op.as_ref(), "params": step.params})));
        nodes.push(json!({
            "id": step_id,
            "kind": "step",
            "transform_class_id": step.transform_class_id,
            "payload_sha256": payload,
        }));
        for input in &step.inputs {
            table_nodes.insert(input.clone());
            edges.push((input.clone(), step_id.clone(), "consumes"));
        }
        for output in &step.outputs {
            table_nodes.insert(output.clone());
            edges.push((step_id.clone(), output.clone(), "produces"));
        }
    }

    for table in &table_nodes {
        nodes.push(json!({
            "id": table,
            "kind": "table",
            "transform_class_id": Json::Null,
            "payload_sha256": sha256_of_json(&Json::String(table.clone())),
        }));
    }

    nodes.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));
    edges.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)).then_with(|| a.2.cmp(b.2)));

    let edges_json: Vec<Json> = edges
        .into_iter()
        .map(|(src, dst, kind)| json!({"src": src, "dst": dst, "kind": kind}))
        .collect();

    json!({ "nodes": nodes, "edges": edges_json })
}

/// Variable-flow graph (`artifacts/vars.graph.json`): edges from each
/// `compute`/`let_scalar` step's input columns referenced in its
/// expressions to the columns/scalars it assigns. Column references are
/// extracted textually from the printed expression (`col_name` tokens),
/// which is sufficient since the strict grammar has no other bare
/// identifiers.
pub fn build_vars_graph(doc: &IRDoc) -> Json {
    let mut edges: Vec<(String, String)> = Vec::new();
    for step in doc.real_steps() {
        if step.op != crate::ir::step::Op::Compute {
            continue;
        }
        if let Some(assignments) = step.params.get("assignments").and_then(|a| a.as_array()) {
            for assign in assignments {
                let target = assign.get("target").and_then(|t| t.as_str()).unwrap_or_default();
                let expr = assign.get("expr").and_then(|e| e.as_str()).unwrap_or_default();
                for source_col in extract_identifiers(expr) {
                    edges.push((source_col, target.to_string()));
                }
            }
        }
    }
    edges.sort();
    edges.dedup();
    let edges_json: Vec<Json> =
        edges.into_iter().map(|(from, to)| json!({"from": from, "to": to})).collect();
    json!({ "edges": edges_json })
}

fn extract_identifiers(expr: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut chars = expr.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_alphabetic() || c == '_' {
            cur.push(c);
            while let Some(&n) = chars.peek() {
                if n.is_ascii_alphanumeric() || n == '_' || n == '.' {
                    cur.push(n);
                    chars.next();
                } else {
                    break;
                }
            }
            if !matches!(cur.as_str(), "and" | "or" | "not" | "true" | "false") {
                out.push(cur.clone());
            }
            cur.clear();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Loc;
    use crate::ir::ids::stamp_identities;
    use crate::ir::step::{Op, Step, StepOrUnknown};

    fn mk_step(op: Op, inputs: &[&str], outputs: &[&str], params: Json) -> Step {
        let mut s = Step {
            id: "s".to_string(),
            op,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            params,
            loc: Loc::single("t.sans", 1),
            transform_id: None,
            transform_class_id: None,
            step_id: None,
        };
        stamp_identities(&mut s);
        s
    }

    #[test]
    fn edges_are_sorted_and_bipartite() {
        let mut doc = IRDoc::new();
        doc.tables = vec!["in".to_string()];
        doc.steps = vec![StepOrUnknown::Step(mk_step(Op::Identity, &["in"], &["out"], json!({})))];
        let graph = build_graph(&doc);
        let edges = graph["edges"].as_array().unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0]["kind"], "consumes");
        assert_eq!(edges[1]["kind"], "produces");
    }

    #[test]
    fn literal_only_change_keeps_class_id_but_changes_payload() {
        let s1 = mk_step(Op::Compute, &["in"], &["out"], json!({"assignments":[{"target":"x","expr":"250"}]}));
        let s2 = mk_step(Op::Compute, &["in"], &["out"], json!({"assignments":[{"target":"x","expr":"300"}]}));
        assert_eq!(s1.transform_class_id, s2.transform_class_id);
        assert_ne!(s1.transform_id, s2.transform_id);
    }

    #[test]
    fn vars_graph_extracts_column_references() {
        let mut doc = IRDoc::new();
        doc.tables = vec!["in".to_string()];
        doc.steps = vec![StepOrUnknown::Step(mk_step(
            Op::Compute,
            &["in"],
            &["out"],
            json!({"assignments":[{"target":"c","expr":"a + b"}]}),
        ))];
        let vg = build_vars_graph(&doc);
        let edges = vg["edges"].as_array().unwrap();
        assert_eq!(edges.len(), 2);
    }
}
