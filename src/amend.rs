//! IR amendment engine (spec §4.10): applies a batch of JSON-described
//! patch operations to an [IRDoc] without re-running the front-end. Every
//! operation is schema-checked before any is applied — a single invalid op
//! refuses the whole batch with `E_AMEND_VALIDATION_SCHEMA`.

use serde_json::{json, Value as Json};

use crate::error::codes;
use crate::ir::ids::stamp_identities;
use crate::ir::step::{IRDoc, Op, Step, StepOrUnknown};
use crate::ir::validate::validate;

#[derive(Debug, Clone, PartialEq, Eq)]
enum OpKind {
    SetParams,
    RemoveStep,
    AddStep,
    RewireInputs,
}

impl OpKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "set_params" => Some(OpKind::SetParams),
            "remove_step" => Some(OpKind::RemoveStep),
            "add_step" => Some(OpKind::AddStep),
            "rewire_inputs" => Some(OpKind::RewireInputs),
            _ => None,
        }
    }

    fn is_destructive(&self) -> bool {
        matches!(self, OpKind::RemoveStep | OpKind::RewireInputs)
    }
}

struct Refusal {
    op_id: String,
    code: &'static str,
    message: String,
}

/// Validates and applies `request` (the parsed amendment batch JSON) against
/// `doc`, returning the response object the CLI/API surfaces directly.
pub fn apply_amendment(doc: &IRDoc, request: &Json) -> Json {
    let allow_destructive = request["policy"]["allow_destructive"].as_bool().unwrap_or(false);
    let ops = request["ops"].as_array().cloned().unwrap_or_default();

    let mut refusals = Vec::new();
    let mut seen_ids = std::collections::HashSet::new();

    for op in &ops {
        let op_id = op["op_id"].as_str().unwrap_or_default().to_string();
        if op_id.is_empty() {
            refusals.push(Refusal { op_id: op_id.clone(), code: codes::E_AMEND_VALIDATION_SCHEMA, message: "op_id is required".to_string() });
            continue;
        }
        if !seen_ids.insert(op_id.clone()) {
            refusals.push(Refusal { op_id: op_id.clone(), code: codes::E_AMEND_VALIDATION_SCHEMA, message: format!("duplicate op_id '{op_id}'") });
            continue;
        }
        let kind_str = op["kind"].as_str().unwrap_or_default();
        let Some(kind) = OpKind::parse(kind_str) else {
            refusals.push(Refusal { op_id, code: codes::E_AMEND_VALIDATION_SCHEMA, message: format!("unknown op kind '{kind_str}'") });
            continue;
        };
        if kind.is_destructive() && !allow_destructive {
            refusals.push(Refusal {
                op_id,
                code: codes::E_AMEND_VALIDATION_SCHEMA,
                message: "destructive ops require policy.allow_destructive".to_string(),
            });
            continue;
        }
        if let Err(msg) = validate_selector(&kind, &op["selector"]) {
            refusals.push(Refusal { op_id, code: codes::E_AMEND_VALIDATION_SCHEMA, message: msg });
        }
    }

    if !refusals.is_empty() {
        return json!({
            "status": "refused",
            "diagnostics": {
                "refusals": refusals.iter().map(|r| json!({"op_id": r.op_id, "code": r.code, "message": r.message})).collect::<Vec<_>>(),
            },
        });
    }

    let mut out = doc.clone();
    let before_assertions = count_asserts(&out);

    for op in &ops {
        let kind = OpKind::parse(op["kind"].as_str().unwrap_or_default()).unwrap();
        apply_op(&mut out, kind, op);
    }

    for s in out.steps.iter_mut() {
        if let StepOrUnknown::Step(step) = s {
            stamp_identities(step);
        }
    }

    let warnings = match validate(&out) {
        Ok(()) => Vec::new(),
        Err(d) => vec![json!({"code": d.code, "message": d.message})],
    };

    let after_assertions = count_asserts(&out);

    json!({
        "status": "ok",
        "diagnostics": { "refusals": Json::Array(vec![]), "warnings": warnings },
        "diff_structural": {
            "step_count_before": doc.real_steps().count(),
            "step_count_after": out.real_steps().count(),
        },
        "diff_assertions": {
            "assert_count_before": before_assertions,
            "assert_count_after": after_assertions,
        },
        "ir_out": out,
    })
}

fn count_asserts(doc: &IRDoc) -> usize {
    doc.real_steps().filter(|s| s.op == Op::Assert).count()
}

fn validate_selector(kind: &OpKind, selector: &Json) -> Result<(), String> {
    let has = |key: &str| !selector[key].is_null();
    match kind {
        OpKind::SetParams => {
            if !(has("step_id") || has("transform_id")) {
                return Err("set_params.selector requires step_id or transform_id".to_string());
            }
            if !has("path") {
                return Err("set_params.selector requires a path".to_string());
            }
            Ok(())
        }
        OpKind::RemoveStep => {
            if !(has("step_id") || has("transform_id")) {
                return Err("remove_step.selector requires step_id or transform_id".to_string());
            }
            Ok(())
        }
        OpKind::RewireInputs => {
            if has("path") || has("assertion_id") {
                return Err("rewire_inputs.selector must not include path or assertion_id".to_string());
            }
            if !(has("step_id") || has("transform_id")) {
                return Err("rewire_inputs.selector requires step_id or transform_id".to_string());
            }
            Ok(())
        }
        OpKind::AddStep => {
            let present = [has("before_step_id"), has("after_step_id"), has("index")];
            if present.iter().filter(|p| **p).count() != 1 {
                return Err("add_step.selector requires exactly one of before_step_id, after_step_id, index".to_string());
            }
            Ok(())
        }
    }
}

fn find_step_idx(doc: &IRDoc, selector: &Json) -> Option<usize> {
    let step_id = selector["step_id"].as_str();
    let transform_id = selector["transform_id"].as_str();
    doc.steps.iter().position(|s| match s {
        StepOrUnknown::Step(st) => {
            (step_id.is_some() && st.step_id.as_deref() == step_id)
                || (transform_id.is_some() && st.transform_id.as_deref() == transform_id)
        }
        StepOrUnknown::Unknown(_) => false,
    })
}

fn apply_op(doc: &mut IRDoc, kind: OpKind, op: &Json) {
    let selector = &op["selector"];
    match kind {
        OpKind::SetParams => {
            if let Some(idx) = find_step_idx(doc, selector) {
                if let StepOrUnknown::Step(step) = &mut doc.steps[idx] {
                    let path = selector["path"].as_str().unwrap_or_default();
                    set_by_pointer(&mut step.params, path, op["params"]["value"].clone());
                }
            }
        }
        OpKind::RemoveStep => {
            if let Some(idx) = find_step_idx(doc, selector) {
                doc.steps.remove(idx);
            }
        }
        OpKind::RewireInputs => {
            if let Some(idx) = find_step_idx(doc, selector) {
                if let StepOrUnknown::Step(step) = &mut doc.steps[idx] {
                    if let Some(inputs) = op["params"]["inputs"].as_array() {
                        step.inputs = inputs.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect();
                    }
                }
            }
        }
        OpKind::AddStep => {
            let Some(new_step) = build_step_from_params(&op["params"]) else { return };
            let insert_at = if let Some(before) = selector["before_step_id"].as_str() {
                find_by_step_id(doc, before).unwrap_or(doc.steps.len())
            } else if let Some(after) = selector["after_step_id"].as_str() {
                find_by_step_id(doc, after).map(|i| i + 1).unwrap_or(doc.steps.len())
            } else {
                selector["index"].as_u64().map(|i| i as usize).unwrap_or(doc.steps.len()).min(doc.steps.len())
            };
            doc.steps.insert(insert_at, StepOrUnknown::Step(new_step));
        }
    }
}

fn find_by_step_id(doc: &IRDoc, step_id: &str) -> Option<usize> {
    doc.steps.iter().position(|s| matches!(s, StepOrUnknown::Step(st) if st.step_id.as_deref() == Some(step_id)))
}

fn build_step_from_params(params: &Json) -> Option<Step> {
    let op_name = params["op"].as_str()?;
    let op = serde_json::from_value::<Op>(json!(op_name)).ok()?;
    let inputs: Vec<String> = params["inputs"].as_array()?.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect();
    let outputs: Vec<String> = params["outputs"].as_array()?.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect();
    let step_params = params["params"].clone();
    Some(Step {
        id: format!("{}_{}", op.as_ref(), outputs.first().cloned().unwrap_or_default()),
        op,
        inputs,
        outputs,
        params: step_params,
        loc: crate::error::Loc::single("amend", 0),
        transform_id: None,
        transform_class_id: None,
        step_id: None,
    })
}

/// Applies a single JSON-pointer-style path (`/a/b/0`, with `~1`→`/` and
/// `~0`→`~` escapes) to set a value within `target`, creating intermediate
/// objects as needed.
fn set_by_pointer(target: &mut Json, path: &str, value: Json) {
    let segments: Vec<String> = path
        .trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect();
    set_by_segments(target, &segments, value);
}

fn set_by_segments(target: &mut Json, segments: &[String], value: Json) {
    if segments.is_empty() {
        *target = value;
        return;
    }
    if !target.is_object() {
        *target = json!({});
    }
    let obj = target.as_object_mut().unwrap();
    let key = &segments[0];
    if segments.len() == 1 {
        obj.insert(key.clone(), value);
    } else {
        let entry = obj.entry(key.clone()).or_insert_with(|| json!({}));
        set_by_segments(entry, &segments[1..], value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Loc;

    fn mk_doc_with_compute() -> IRDoc {
        let mut doc = IRDoc::new();
        doc.tables = vec!["in".to_string()];
        let mut step = Step {
            id: "compute_out".to_string(),
            op: Op::Compute,
            inputs: vec!["in".to_string()],
            outputs: vec!["out".to_string()],
            params: json!({"assignments": [{"target": "c", "expr": "250"}]}),
            loc: Loc::single("t.sans", 1),
            transform_id: None,
            transform_class_id: None,
            step_id: None,
        };
        stamp_identities(&mut step);
        doc.steps = vec![StepOrUnknown::Step(step)];
        doc
    }

    #[test]
    fn unknown_op_kind_is_refused() {
        let doc = mk_doc_with_compute();
        let request = json!({"ops": [{"op_id": "a", "kind": "nope", "selector": {}, "params": {}}]});
        let resp = apply_amendment(&doc, &request);
        assert_eq!(resp["status"], "refused");
    }

    #[test]
    fn destructive_op_without_policy_is_refused() {
        let doc = mk_doc_with_compute();
        let step_id = doc.real_steps().next().unwrap().step_id.clone().unwrap();
        let request = json!({"ops": [{"op_id": "a", "kind": "remove_step", "selector": {"step_id": step_id}, "params": {}}]});
        let resp = apply_amendment(&doc, &request);
        assert_eq!(resp["status"], "refused");
    }

    #[test]
    fn set_params_patches_a_literal_and_restamps() {
        let doc = mk_doc_with_compute();
        let step_id = doc.real_steps().next().unwrap().step_id.clone().unwrap();
        let old_transform_id = doc.real_steps().next().unwrap().transform_id.clone();
        let request = json!({
            "ops": [{
                "op_id": "a",
                "kind": "set_params",
                "selector": {"step_id": step_id, "path": "/assignments/0/expr"},
                "params": {"value": "300"},
            }],
        });
        let resp = apply_amendment(&doc, &request);
        assert_eq!(resp["status"], "ok");
        let ir_out: IRDoc = serde_json::from_value(resp["ir_out"].clone()).unwrap();
        let new_step = ir_out.real_steps().next().unwrap();
        assert_eq!(new_step.params["assignments"][0]["expr"], "300");
        assert_ne!(new_step.transform_id, old_transform_id);
    }

    #[test]
    fn destructive_op_with_policy_is_applied() {
        let doc = mk_doc_with_compute();
        let step_id = doc.real_steps().next().unwrap().step_id.clone().unwrap();
        let request = json!({
            "policy": {"allow_destructive": true},
            "ops": [{"op_id": "a", "kind": "remove_step", "selector": {"step_id": step_id}, "params": {}}],
        });
        let resp = apply_amendment(&doc, &request);
        assert_eq!(resp["status"], "ok");
        assert_eq!(resp["diff_structural"]["step_count_after"], 0);
    }
}
