//! Structural validation of an [IRDoc] (spec §3 invariants, §4.4).
//!
//! Cycle detection reuses the teacher's `toposort` shape
//! (`src/utils/toposort.rs`): build a dependency list keyed by step index,
//! visit with a visiting/done flag per node, and treat a revisit of an
//! in-progress node as a cycle.

use std::collections::{HashMap, HashSet};

use crate::error::{codes, Diagnostic};
use crate::ir::step::{IRDoc, StepOrUnknown};

/// Runs every structural check in spec §3. Pure: never mutates `doc.steps`
/// params (invariant 3's "validate never mutates params" is upheld simply
/// by taking `&IRDoc`, not `&mut IRDoc`).
pub fn validate(doc: &IRDoc) -> Result<(), Diagnostic> {
    if doc.is_fatal_refusal() {
        // A fatal UnknownBlockStep already represents "validation" for this
        // doc: there is nothing else to check.
        return Ok(());
    }

    check_no_duplicate_outputs(doc)?;
    check_inputs_declared_or_produced(doc)?;
    check_topological_order(doc)?;
    check_has_save(doc)?;
    Ok(())
}

fn check_no_duplicate_outputs(doc: &IRDoc) -> Result<(), Diagnostic> {
    let mut seen_tables: HashSet<&str> = HashSet::new();
    let mut seen_save_paths: HashSet<String> = HashSet::new();
    for step in doc.real_steps() {
        for out in &step.outputs {
            if !seen_tables.insert(out.as_str()) {
                return Err(Diagnostic::new(
                    codes::SANS_VALIDATE_DUPLICATE_OUTPUT,
                    format!("table '{out}' is produced by more than one step"),
                )
                .with_loc(step.loc.clone()));
            }
        }
        if step.op == crate::ir::step::Op::Save {
            if let Some(path) = step.params.get("path").and_then(|v| v.as_str()) {
                if !seen_save_paths.insert(path.to_string()) {
                    return Err(Diagnostic::new(
                        codes::SANS_VALIDATE_DUPLICATE_SAVE_PATH,
                        format!("save destination '{path}' is written by more than one step"),
                    )
                    .with_loc(step.loc.clone()));
                }
            }
        }
    }
    Ok(())
}

fn check_inputs_declared_or_produced(doc: &IRDoc) -> Result<(), Diagnostic> {
    let declared: HashSet<&str> = doc.tables.iter().map(|s| s.as_str()).collect();
    let mut produced: HashSet<&str> = HashSet::new();
    for step in doc.real_steps() {
        for input in &step.inputs {
            if !declared.contains(input.as_str()) && !produced.contains(input.as_str()) {
                return Err(Diagnostic::new(
                    codes::SANS_VALIDATE_UNDECLARED_INPUT,
                    format!("table '{input}' is neither declared nor produced by an earlier step"),
                )
                .with_loc(step.loc.clone()));
            }
        }
        for out in &step.outputs {
            produced.insert(out.as_str());
        }
    }
    Ok(())
}

fn check_topological_order(doc: &IRDoc) -> Result<(), Diagnostic> {
    let steps: Vec<&crate::ir::step::Step> = doc.real_steps().collect();
    let mut producer_of: HashMap<&str, usize> = HashMap::new();
    for (i, step) in steps.iter().enumerate() {
        for out in &step.outputs {
            producer_of.insert(out.as_str(), i);
        }
    }

    let deps: Vec<Vec<usize>> = steps
        .iter()
        .map(|step| {
            step.inputs
                .iter()
                .filter_map(|i| producer_of.get(i.as_str()).copied())
                .collect()
        })
        .collect();

    let mut visiting = vec![false; steps.len()];
    let mut done = vec![false; steps.len()];

    fn visit(
        n: usize,
        deps: &[Vec<usize>],
        visiting: &mut [bool],
        done: &mut [bool],
    ) -> Result<(), ()> {
        if done[n] {
            return Ok(());
        }
        if visiting[n] {
            return Err(());
        }
        visiting[n] = true;
        for &m in &deps[n] {
            visit(m, deps, visiting, done)?;
        }
        visiting[n] = false;
        done[n] = true;
        Ok(())
    }

    for n in 0..steps.len() {
        if visit(n, &deps, &mut visiting, &mut done).is_err() {
            return Err(Diagnostic::new(
                codes::SANS_VALIDATE_CYCLE,
                "cyclic dependency among steps",
            )
            .with_loc(steps[n].loc.clone()));
        }
    }

    // Producer must textually precede consumer (declared execution order is
    // the only order the engine honors; spec requires "topological order").
    for (i, step) in steps.iter().enumerate() {
        for input in &step.inputs {
            if let Some(&p) = producer_of.get(input.as_str()) {
                if p >= i {
                    return Err(Diagnostic::new(
                        codes::SANS_VALIDATE_CYCLE,
                        format!("table '{input}' is consumed before it is produced"),
                    )
                    .with_loc(step.loc.clone()));
                }
            }
        }
    }
    Ok(())
}

fn check_has_save(doc: &IRDoc) -> Result<(), Diagnostic> {
    let has_save = doc.real_steps().any(|s| s.op == crate::ir::step::Op::Save);
    if !has_save {
        return Err(Diagnostic::new(
            codes::SANS_VALIDATE_NO_SAVE,
            "a runnable doc must contain at least one save step",
        ));
    }
    Ok(())
}

/// Dangling tables: produced but never consumed and never saved. Spec §3
/// calls this a warning, escalated to a refusal only in strict mode.
pub fn dangling_tables(doc: &IRDoc) -> Vec<String> {
    let mut produced: HashSet<&str> = HashSet::new();
    let mut consumed: HashSet<&str> = HashSet::new();
    for step in doc.real_steps() {
        for out in &step.outputs {
            produced.insert(out.as_str());
        }
        for input in &step.inputs {
            consumed.insert(input.as_str());
        }
    }
    let mut dangling: Vec<String> = produced
        .difference(&consumed)
        .map(|s| s.to_string())
        .collect();
    dangling.sort();
    dangling
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Loc;
    use crate::ir::step::{DatasourceDecl, DatasourceKind, Op, Step, StepOrUnknown};
    use serde_json::json;

    fn step(id: &str, op: Op, inputs: &[&str], outputs: &[&str]) -> StepOrUnknown {
        StepOrUnknown::Step(Step {
            id: id.to_string(),
            op,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            params: json!({}),
            loc: Loc::single("t.sans", 1),
            transform_id: None,
            transform_class_id: None,
            step_id: None,
        })
    }

    fn doc_with(steps: Vec<StepOrUnknown>, tables: &[&str]) -> IRDoc {
        let mut doc = IRDoc::new();
        doc.steps = steps;
        doc.tables = tables.iter().map(|s| s.to_string()).collect();
        doc.datasources.insert(
            "in".to_string(),
            DatasourceDecl {
                kind: DatasourceKind::Csv,
                path: Some("in.csv".to_string()),
                inline_text: None,
                inline_sha256: None,
                columns: None,
            },
        );
        doc
    }

    #[test]
    fn accepts_linear_pipeline_with_save() {
        let doc = doc_with(
            vec![
                step("s1", Op::Identity, &["in"], &["out"]),
                step("s2", Op::Save, &["out"], &[]),
            ],
            &["in"],
        );
        assert!(validate(&doc).is_ok());
    }

    #[test]
    fn rejects_duplicate_output() {
        let doc = doc_with(
            vec![
                step("s1", Op::Identity, &["in"], &["out"]),
                step("s2", Op::Identity, &["in"], &["out"]),
                step("s3", Op::Save, &["out"], &[]),
            ],
            &["in"],
        );
        let err = validate(&doc).unwrap_err();
        assert_eq!(err.code, codes::SANS_VALIDATE_DUPLICATE_OUTPUT);
    }

    #[test]
    fn rejects_undeclared_input() {
        let doc = doc_with(vec![step("s1", Op::Save, &["missing"], &[])], &["in"]);
        let err = validate(&doc).unwrap_err();
        assert_eq!(err.code, codes::SANS_VALIDATE_UNDECLARED_INPUT);
    }

    #[test]
    fn rejects_missing_save() {
        let doc = doc_with(vec![step("s1", Op::Identity, &["in"], &["out"])], &["in"]);
        let err = validate(&doc).unwrap_err();
        assert_eq!(err.code, codes::SANS_VALIDATE_NO_SAVE);
    }

    #[test]
    fn rejects_consumption_before_production() {
        let doc = doc_with(
            vec![
                step("s1", Op::Save, &["out"], &[]),
                step("s2", Op::Identity, &["in"], &["out"]),
            ],
            &["in"],
        );
        let err = validate(&doc).unwrap_err();
        assert_eq!(err.code, codes::SANS_VALIDATE_CYCLE);
    }

    #[test]
    fn dangling_table_is_detected() {
        let doc = doc_with(
            vec![
                step("s1", Op::Identity, &["in"], &["mid"]),
                step("s2", Op::Identity, &["in"], &["out"]),
                step("s3", Op::Save, &["out"], &[]),
            ],
            &["in"],
        );
        assert_eq!(dangling_tables(&doc), vec!["mid".to_string()]);
    }

    #[test]
    fn validate_is_idempotent() {
        let doc = doc_with(
            vec![
                step("s1", Op::Identity, &["in"], &["out"]),
                step("s2", Op::Save, &["out"], &[]),
            ],
            &["in"],
        );
        assert_eq!(validate(&doc).is_ok(), validate(&doc).is_ok());
    }
}
