//! Content-addressed step identities (spec §4.5).

use serde_json::{json, Value as Json};

use crate::ir::canon::sha256_of_json;
use crate::ir::step::{Op, Step};

/// `transform_id = sha256(canonical({op, params}))`.
pub fn transform_id(op: Op, params: &Json) -> String {
    sha256_of_json(&json!({ "op": op.as_ref(), "params": params }))
}

/// `transform_class_id = sha256(canonical({op, param_shape(params)}))`.
/// Two steps differing only in literal constants share a class id.
pub fn transform_class_id(op: Op, params: &Json) -> String {
    sha256_of_json(&json!({ "op": op.as_ref(), "params": param_shape(params) }))
}

/// `step_id = sha256(canonical({transform_id, inputs, outputs}))`.
pub fn step_id(transform_id: &str, inputs: &[String], outputs: &[String]) -> String {
    sha256_of_json(&json!({
        "transform_id": transform_id,
        "inputs": inputs,
        "outputs": outputs,
    }))
}

/// Replaces every literal JSON value with its type tag, preserving
/// structure (object keys, array length/order).
pub fn param_shape(v: &Json) -> Json {
    match v {
        Json::Null => Json::String("null".to_string()),
        Json::Bool(_) => Json::String("bool".to_string()),
        Json::Number(n) => {
            Json::String(if n.is_i64() || n.is_u64() { "int" } else { "decimal" }.to_string())
        }
        Json::String(_) => Json::String("string".to_string()),
        Json::Array(items) => Json::Array(items.iter().map(param_shape).collect()),
        Json::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), param_shape(v));
            }
            Json::Object(out)
        }
    }
}

/// Stamps `transform_id`/`transform_class_id`/`step_id` onto a step from its
/// current `op`/`params`/`inputs`/`outputs`. Called once at plan-emission
/// time; these fields are never part of the stored `sans.ir` (spec §6).
pub fn stamp_identities(step: &mut Step) {
    let tid = transform_id(step.op, &step.params);
    let tcid = transform_class_id(step.op, &step.params);
    let sid = step_id(&tid, &step.inputs, &step.outputs);
    step.transform_id = Some(tid);
    step.transform_class_id = Some(tcid);
    step.step_id = Some(sid);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn class_id_stable_across_literal_change() {
        let a = json!({"target": "x", "expr": "250"});
        let b = json!({"target": "x", "expr": "300"});
        assert_eq!(
            transform_class_id(Op::Compute, &a),
            transform_class_id(Op::Compute, &b)
        );
        assert_ne!(transform_id(Op::Compute, &a), transform_id(Op::Compute, &b));
    }

    #[test]
    fn step_id_depends_on_wiring() {
        let tid = transform_id(Op::Identity, &json!({}));
        let a = step_id(&tid, &["in".to_string()], &["out".to_string()]);
        let b = step_id(&tid, &["in".to_string()], &["out2".to_string()]);
        assert_ne!(a, b);
    }
}
