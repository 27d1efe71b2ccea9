//! Artifact bundle assembly and self-hash protocol (spec §4.9).
//!
//! A bundle is a flat set of named files: the stored IR (`plan.ir.json`),
//! the expanded/preprocessed script text, the `artifacts/*.json` analysis
//! outputs, every `save`d table, and a `report.json` that hashes every other
//! file in the bundle and then hashes *itself* (with its own hash slot
//! nulled out during that computation) so a single field proves the whole
//! bundle is untampered.

use std::collections::BTreeMap;

use serde_json::{json, Value as Json};

use crate::error::{codes, Diagnostic};
use crate::exec::ExecutionResult;
use crate::ir::canon::{sha256_hex, sha256_of_json};
use crate::ir::step::IRDoc;

pub const REPORT_FILE: &str = "report.json";
pub const PLAN_FILE: &str = "plan.ir.json";
pub const EXPANDED_FILE: &str = "expanded.sans";
pub const PREPROCESSED_FILE: &str = "preprocessed.sans";
pub const RUNTIME_EVIDENCE_FILE: &str = "artifacts/runtime.evidence.json";
pub const SCHEMA_EVIDENCE_FILE: &str = "artifacts/schema.evidence.json";
pub const GRAPH_FILE: &str = "artifacts/graph.json";
pub const VARS_GRAPH_FILE: &str = "artifacts/vars.graph.json";

#[derive(Debug, Clone)]
pub struct BundleFile {
    pub path: String,
    pub bytes: Vec<u8>,
}

/// Assembles every bundle file except `report.json`, then computes and
/// appends the self-hashed report as the last file.
pub fn build_bundle(
    doc: &IRDoc,
    expanded: &str,
    preprocessed: Option<&str>,
    exec: &ExecutionResult,
    graph: &Json,
    vars_graph: &Json,
) -> Result<Vec<BundleFile>, Diagnostic> {
    let mut files: Vec<BundleFile> = Vec::new();

    let ir_bytes = serde_json::to_vec_pretty(doc)
        .map_err(|e| Diagnostic::new(codes::SANS_RUNTIME_TYPE, format!("IR is not serializable: {e}")))?;
    files.push(BundleFile { path: PLAN_FILE.to_string(), bytes: ir_bytes });

    files.push(BundleFile { path: EXPANDED_FILE.to_string(), bytes: expanded.as_bytes().to_vec() });
    if let Some(p) = preprocessed {
        files.push(BundleFile { path: PREPROCESSED_FILE.to_string(), bytes: p.as_bytes().to_vec() });
    }

    files.push(BundleFile {
        path: RUNTIME_EVIDENCE_FILE.to_string(),
        bytes: serde_json::to_vec_pretty(&exec.runtime_evidence).unwrap(),
    });
    files.push(BundleFile {
        path: SCHEMA_EVIDENCE_FILE.to_string(),
        bytes: serde_json::to_vec_pretty(&exec.schema_evidence).unwrap(),
    });
    files.push(BundleFile { path: GRAPH_FILE.to_string(), bytes: serde_json::to_vec_pretty(graph).unwrap() });
    files.push(BundleFile {
        path: VARS_GRAPH_FILE.to_string(),
        bytes: serde_json::to_vec_pretty(vars_graph).unwrap(),
    });

    for output in &exec.outputs {
        files.push(BundleFile { path: output.path.clone(), bytes: output.bytes.clone() });
    }

    let report = build_report(&files);
    files.push(BundleFile { path: REPORT_FILE.to_string(), bytes: serde_json::to_vec_pretty(&report).unwrap() });

    Ok(files)
}

/// Exposed so `check` (which never executes anything) can hash a partial
/// bundle of just the plan/script files without going through [build_bundle].
pub(crate) fn build_report(files: &[BundleFile]) -> Json {
    let file_hashes: BTreeMap<String, String> =
        files.iter().map(|f| (f.path.clone(), sha256_hex(&f.bytes))).collect();

    let unsigned = json!({
        "version": "0.1",
        "files": file_hashes,
        "self_sha256": Json::Null,
    });
    let self_hash = sha256_of_json(&unsigned);

    json!({
        "version": "0.1",
        "files": file_hashes,
        "self_sha256": self_hash,
    })
}

/// Re-verifies a previously built bundle: every non-report file's recorded
/// hash in `report.json` still matches its bytes, and the report's own
/// `self_sha256` still matches a fresh computation over itself nulled out.
/// Returns `Ok(())` iff the bundle is bit-for-bit as built.
pub fn verify(files: &[BundleFile]) -> Result<(), Diagnostic> {
    let report_file = files
        .iter()
        .find(|f| f.path == REPORT_FILE)
        .ok_or_else(|| Diagnostic::new(codes::SANS_RUNTIME_INPUT_NOT_FOUND, "bundle has no report.json"))?;
    let report: Json = serde_json::from_slice(&report_file.bytes)
        .map_err(|e| Diagnostic::new(codes::E_TYPE_UNKNOWN, format!("report.json is not valid JSON: {e}")))?;

    let recorded_self = report["self_sha256"]
        .as_str()
        .ok_or_else(|| Diagnostic::new(codes::E_TYPE_UNKNOWN, "report.json has no self_sha256"))?
        .to_string();

    let mut recomputed = report.clone();
    recomputed["self_sha256"] = Json::Null;
    let expected_self = sha256_of_json(&recomputed);
    if recorded_self != expected_self {
        return Err(Diagnostic::new(codes::E_TYPE_UNKNOWN, "report.json self_sha256 does not match its own contents"));
    }

    let recorded_files = report["files"]
        .as_object()
        .ok_or_else(|| Diagnostic::new(codes::E_TYPE_UNKNOWN, "report.json has no files map"))?;

    for file in files {
        if file.path == REPORT_FILE {
            continue;
        }
        let expected = recorded_files
            .get(&file.path)
            .and_then(|v| v.as_str())
            .ok_or_else(|| Diagnostic::new(codes::E_TYPE_UNKNOWN, format!("report.json is missing a hash for '{}'", file.path)))?;
        let actual = sha256_hex(&file.bytes);
        if expected != actual {
            return Err(Diagnostic::new(
                codes::E_TYPE_UNKNOWN,
                format!("bundle file '{}' does not match its recorded hash", file.path),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::DEFAULT_EVIDENCE_CONFIG;
    use crate::exec::SavedFile;
    use std::collections::HashMap;

    fn empty_exec() -> ExecutionResult {
        ExecutionResult {
            tables: HashMap::new(),
            runtime_evidence: json!({}),
            schema_evidence: json!({}),
            outputs: vec![SavedFile { path: "out.csv".to_string(), bytes: b"a\n1\n".to_vec() }],
            scalars: HashMap::new(),
        }
    }

    #[test]
    fn unmodified_bundle_verifies() {
        let doc = IRDoc::new();
        let exec = empty_exec();
        let files = build_bundle(&doc, "data out; run;", None, &exec, &json!({}), &json!({})).unwrap();
        assert!(verify(&files).is_ok());
        let _ = DEFAULT_EVIDENCE_CONFIG;
    }

    #[test]
    fn tampered_output_file_fails_verify() {
        let doc = IRDoc::new();
        let exec = empty_exec();
        let mut files = build_bundle(&doc, "data out; run;", None, &exec, &json!({}), &json!({})).unwrap();
        let out = files.iter_mut().find(|f| f.path == "out.csv").unwrap();
        out.bytes = b"a\n999\n".to_vec();
        assert!(verify(&files).is_err());
    }

    #[test]
    fn tampered_self_hash_fails_verify() {
        let doc = IRDoc::new();
        let exec = empty_exec();
        let mut files = build_bundle(&doc, "data out; run;", None, &exec, &json!({}), &json!({})).unwrap();
        let report = files.iter_mut().find(|f| f.path == REPORT_FILE).unwrap();
        let mut v: Json = serde_json::from_slice(&report.bytes).unwrap();
        v["self_sha256"] = json!("0".repeat(64));
        report.bytes = serde_json::to_vec_pretty(&v).unwrap();
        assert!(verify(&files).is_err());
    }
}
