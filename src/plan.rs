//! Plan assembly (spec §6): wires the script front-end, lowering, datasource
//! schema inference, and IR validation into the single entry point the
//! `check`/`run`/`emit-ir` CLI commands share.

use crate::ast::macros::IncludeResolver;
use crate::ast::script::parse_script;
use crate::codec::schema_infer::{infer_csv_schema, DEFAULT_INFER_MAX_ROWS};
use crate::error::Diagnostic;
use crate::ir::canon::sha256_hex;
use crate::ir::ids::stamp_identities;
use crate::ir::step::{ColumnFact, DatasourceDecl, DatasourceKind, IRDoc, StepOrUnknown, TableFact};
use crate::ir::validate::validate;
use crate::lower::lower_script;

/// A `--tables NAME=PATH` / inline binding resolved at plan time, before any
/// IR exists. `path` is relative to a base the caller (the CLI) controls;
/// `plan` itself never touches the filesystem directly — it is handed
/// already-read content so it stays testable without a real disk.
pub enum TableBinding {
    Csv { path: String, content: String },
    InlineCsv { content: String },
}

pub struct PlanResult {
    pub doc: IRDoc,
    pub legacy: bool,
    pub expanded: String,
    pub preprocessed: Option<String>,
}

/// Builds a validated, identity-stamped [IRDoc] from script source and its
/// external table bindings. `bindings` order determines `doc.tables` order.
pub fn build_plan(
    source: &str,
    file: &str,
    force_legacy: bool,
    bindings: &[(String, TableBinding)],
    resolver: &dyn IncludeResolver,
) -> Result<PlanResult, Diagnostic> {
    let script = parse_script(source, file, force_legacy, resolver)?;
    let declared_tables: Vec<String> = bindings.iter().map(|(name, _)| name.clone()).collect();
    let mut doc = lower_script(&script, &declared_tables);

    for (name, binding) in bindings {
        let (decl, fact) = datasource_from_binding(binding);
        doc.datasources.insert(name.clone(), decl);
        doc.table_facts.insert(name.clone(), fact);
    }

    for s in doc.steps.iter_mut() {
        if let StepOrUnknown::Step(step) = s {
            stamp_identities(step);
        }
    }

    if !doc.is_fatal_refusal() {
        validate(&doc)?;
    }

    let expanded = script.preprocessed.clone().unwrap_or_else(|| source.to_string());
    Ok(PlanResult { doc, legacy: script.legacy, expanded, preprocessed: script.preprocessed })
}

fn datasource_from_binding(binding: &TableBinding) -> (DatasourceDecl, TableFact) {
    match binding {
        TableBinding::Csv { path, content } => {
            let inferred = infer_csv_schema(content, DEFAULT_INFER_MAX_ROWS);
            let columns: Vec<ColumnFact> =
                inferred.columns.iter().map(|c| ColumnFact { name: c.name.clone(), ty: c.ty }).collect();
            let decl = DatasourceDecl {
                kind: DatasourceKind::Csv,
                path: Some(path.clone()),
                inline_text: None,
                inline_sha256: None,
                columns: Some(columns.clone()),
            };
            (decl, TableFact { columns: Some(columns) })
        }
        TableBinding::InlineCsv { content } => {
            let inferred = infer_csv_schema(content, DEFAULT_INFER_MAX_ROWS);
            let columns: Vec<ColumnFact> =
                inferred.columns.iter().map(|c| ColumnFact { name: c.name.clone(), ty: c.ty }).collect();
            let decl = DatasourceDecl {
                kind: DatasourceKind::InlineCsv,
                path: None,
                inline_text: Some(content.clone()),
                inline_sha256: Some(sha256_hex(content.as_bytes())),
                columns: Some(columns.clone()),
            };
            (decl, TableFact { columns: Some(columns) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::script::NoIncludes;

    #[test]
    fn builds_and_validates_a_hello_world_plan() {
        let bindings = vec![(
            "in".to_string(),
            TableBinding::InlineCsv { content: "a,b\n1,2\n".to_string() },
        )];
        let result = build_plan(
            "data out; set in; c = a + b; run;",
            "t.sans",
            true,
            &bindings,
            &NoIncludes,
        )
        .unwrap();
        assert!(!result.doc.is_fatal_refusal());
        let step = result.doc.real_steps().next().unwrap();
        assert!(step.transform_id.is_some());
        assert!(step.step_id.is_some());
    }

    #[test]
    fn fatal_refusal_skips_validation_but_still_returns() {
        let result = build_plan("proc nonsense data=in out=out; run;", "t.sans", true, &[], &NoIncludes).unwrap();
        assert!(result.doc.is_fatal_refusal());
    }
}
