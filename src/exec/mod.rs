//! Execution engine (spec §4.6): walks an [IRDoc] in declared order,
//! materializing each step's inputs from prior outputs or bound datasources,
//! and records per-table evidence along the way.

pub mod eval;
pub mod ops;
pub mod table;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::{json, Value as Json};

use crate::codec::csv::{self, CoercionDiagnostic};
use crate::codec::xpt::{self, XptVarKind};
use crate::error::{codes, Diagnostic, Loc};
use crate::evidence::{collect_table_evidence, DEFAULT_EVIDENCE_CONFIG};
use crate::exec::eval::FormatRegistry;
use crate::exec::table::Table;
use crate::ir::step::{DatasourceKind, IRDoc, Op, Step};
use crate::value::{Type, Value};

/// Sampling/caps context (spec §9 "Sampling and caps"). An immutable value
/// threaded through a run rather than a global.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub loop_limit: usize,
    pub nesting_depth_cap: usize,
}

pub const DEFAULT_ENGINE_CONFIG: EngineConfig = EngineConfig { loop_limit: 1_000_000, nesting_depth_cap: 32 };

pub struct SavedFile {
    pub path: String,
    pub bytes: Vec<u8>,
}

pub struct ExecutionResult {
    pub tables: HashMap<String, Table>,
    pub runtime_evidence: Json,
    pub schema_evidence: Json,
    pub outputs: Vec<SavedFile>,
    pub scalars: HashMap<String, Value>,
}

/// Reads external datasource bytes. A thin trait so tests can substitute an
/// in-memory filesystem without touching disk.
pub trait SourceReader {
    fn read_to_string(&self, path: &Path) -> Result<String, Diagnostic>;
}

pub struct FsReader {
    pub base_dir: PathBuf,
}

impl SourceReader for FsReader {
    fn read_to_string(&self, path: &Path) -> Result<String, Diagnostic> {
        let full = self.base_dir.join(path);
        std::fs::read_to_string(&full).map_err(|e| {
            Diagnostic::new(
                codes::SANS_RUNTIME_INPUT_NOT_FOUND,
                format!("could not read '{}': {e}", full.display()),
            )
        })
    }
}

pub struct Engine<'a> {
    reader: &'a dyn SourceReader,
    config: EngineConfig,
}

impl<'a> Engine<'a> {
    pub fn new(reader: &'a dyn SourceReader, config: EngineConfig) -> Self {
        Engine { reader, config }
    }

    pub fn run(&self, doc: &IRDoc) -> Result<ExecutionResult, Diagnostic> {
        if doc.is_fatal_refusal() {
            return Err(Diagnostic::new(codes::SANS_PARSE_UNSUPPORTED_STATEMENT, "cannot execute a fatally refused plan"));
        }

        let mut tables: HashMap<String, Table> = HashMap::new();
        let mut scalars: HashMap<String, Value> = HashMap::new();
        let mut formats = FormatRegistry::default();
        let mut runtime_evidence = serde_json::Map::new();
        let mut schema_evidence = serde_json::Map::new();
        let mut outputs = Vec::new();

        for (name, decl) in &doc.datasources {
            let columns: Option<Vec<(String, Type)>> =
                decl.columns.as_ref().map(|cols| cols.iter().map(|c| (c.name.clone(), c.ty)).collect());
            let content = match decl.kind {
                DatasourceKind::Csv => {
                    let path = decl.path.as_deref().ok_or_else(|| {
                        Diagnostic::new(codes::SANS_RUNTIME_INPUT_NOT_FOUND, format!("datasource '{name}' has no path"))
                    })?;
                    self.reader.read_to_string(Path::new(path))?
                }
                DatasourceKind::InlineCsv => decl.inline_text.clone().unwrap_or_default(),
            };
            let result = csv::read_csv(&content, columns.as_deref())?;
            if !result.coercion_diagnostics.is_empty() {
                schema_evidence.insert(name.clone(), coercion_diagnostics_json(&result.coercion_diagnostics));
            }
            tables.insert(name.clone(), result.table);
        }

        for step in doc.real_steps() {
            log::debug!("executing step {} ({})", step.id, step.op.as_ref());
            self.exec_step(step, &mut tables, &mut scalars, &mut formats, &mut runtime_evidence, &mut outputs).map_err(|e| {
                log::warn!("step {} failed: {e}", step.id);
                e
            })?;
        }

        Ok(ExecutionResult {
            tables,
            runtime_evidence: Json::Object(runtime_evidence),
            schema_evidence: Json::Object(schema_evidence),
            outputs,
            scalars,
        })
    }

    fn exec_step(
        &self,
        step: &Step,
        tables: &mut HashMap<String, Table>,
        scalars: &mut HashMap<String, Value>,
        formats: &mut FormatRegistry,
        runtime_evidence: &mut serde_json::Map<String, Json>,
        outputs: &mut Vec<SavedFile>,
    ) -> Result<(), Diagnostic> {
        let input_table = |tables: &HashMap<String, Table>, name: &str| -> Result<Table, Diagnostic> {
            tables.get(name).cloned().ok_or_else(|| {
                Diagnostic::new(codes::SANS_RUNTIME_INPUT_NOT_FOUND, format!("table '{name}' is not available"))
                    .with_loc(step.loc.clone())
            })
        };

        match step.op {
            Op::Datasource => {} // bound datasources are already loaded before the step loop runs
            Op::Identity => {
                let src = input_table(tables, &step.inputs[0])?;
                let out = ops::identity(&src);
                record_evidence(runtime_evidence, &step.outputs[0], &out);
                tables.insert(step.outputs[0].clone(), out);
            }
            Op::Compute => {
                let src = input_table(tables, &step.inputs[0])?;
                let assignments = parse_assignments(&step.params)?;
                let out = ops::compute(&src, &assignments, scalars, formats, &step.loc)?;
                record_evidence(runtime_evidence, &step.outputs[0], &out);
                tables.insert(step.outputs[0].clone(), out);
            }
            Op::Filter => {
                let src = input_table(tables, &step.inputs[0])?;
                let expr = step.params["expr"].as_str().unwrap_or_default();
                let out = ops::filter(&src, expr, scalars, formats, &step.loc)?;
                record_evidence(runtime_evidence, &step.outputs[0], &out);
                tables.insert(step.outputs[0].clone(), out);
            }
            Op::Select => {
                let src = input_table(tables, &step.inputs[0])?;
                let mode = step.params["mode"].as_str().unwrap_or("keep");
                let columns = json_str_array(&step.params["columns"]);
                let out = ops::select(&src, mode, &columns, &step.loc)?;
                record_evidence(runtime_evidence, &step.outputs[0], &out);
                tables.insert(step.outputs[0].clone(), out);
            }
            Op::Rename => {
                let src = input_table(tables, &step.inputs[0])?;
                let pairs = step.params["pairs"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(|p| (p["from"].as_str().unwrap_or_default().to_string(), p["to"].as_str().unwrap_or_default().to_string()))
                    .collect::<Vec<_>>();
                let out = ops::rename(&src, &pairs, &step.loc)?;
                record_evidence(runtime_evidence, &step.outputs[0], &out);
                tables.insert(step.outputs[0].clone(), out);
            }
            Op::Sort => {
                let src = input_table(tables, &step.inputs[0])?;
                let by = step.params["by"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(|b| (b["col"].as_str().unwrap_or_default().to_string(), b["desc"].as_bool().unwrap_or(false)))
                    .collect::<Vec<_>>();
                let nodupkey = step.params.get("nodupkey").and_then(|v| v.as_bool()).unwrap_or(false);
                let out = ops::sort(&src, &by, nodupkey, &step.loc)?;
                record_evidence(runtime_evidence, &step.outputs[0], &out);
                tables.insert(step.outputs[0].clone(), out);
            }
            Op::Aggregate => {
                let src = input_table(tables, &step.inputs[0])?;
                let class = json_str_array(&step.params["class"]);
                let var = json_str_array(&step.params["var"]);
                let stats = json_str_array(&step.params["stats"]);
                let out = ops::aggregate(&src, &class, &var, &stats, &step.loc)?;
                record_evidence(runtime_evidence, &step.outputs[0], &out);
                tables.insert(step.outputs[0].clone(), out);
            }
            Op::Transpose => {
                let src = input_table(tables, &step.inputs[0])?;
                let by = json_str_array(&step.params["by"]);
                let id = step.params["id"].as_str().unwrap_or_default();
                let var = json_str_array(&step.params["var"]);
                let out = ops::transpose(&src, &by, id, &var, &step.loc)?;
                record_evidence(runtime_evidence, &step.outputs[0], &out);
                tables.insert(step.outputs[0].clone(), out);
            }
            Op::SqlSelect => {
                let out = self.exec_sql_select(step, tables, scalars, formats)?;
                record_evidence(runtime_evidence, &step.outputs[0], &out);
                tables.insert(step.outputs[0].clone(), out);
            }
            Op::Format => {
                ops::register_format(formats, &step.params)?;
            }
            Op::DataStep => {
                let src = input_table(tables, &step.inputs[0])?;
                let out = self.exec_data_step(&src, &step.params, formats, scalars, &step.loc)?;
                record_evidence(runtime_evidence, &step.outputs[0], &out);
                tables.insert(step.outputs[0].clone(), out);
            }
            Op::Assert => {
                let src = input_table(tables, &step.inputs[0])?;
                let expr = step.params["expr"].as_str().unwrap_or_default();
                let message = step.params.get("message").and_then(|m| m.as_str());
                ops::assert_rows(&src, expr, message, scalars, formats, &step.loc)?;
                if let Some(out_name) = step.outputs.first() {
                    tables.insert(out_name.clone(), src);
                }
            }
            Op::LetScalar => {
                let src = input_table(tables, &step.inputs[0])?;
                let name = step.params["name"].as_str().unwrap_or_default().to_string();
                let expr_text = step.params["expr"].as_str().unwrap_or_default();
                let expr = crate::ast::parser::parse_expr(expr_text, &step.loc.file, step.loc.line_start)?;
                let row = src.rows.first().cloned().unwrap_or_default();
                let ctx = eval::EvalCtx { columns: &src.columns, row: &row, scalars, formats };
                let v = eval::eval(&expr, &ctx)?;
                scalars.insert(name, v);
            }
            Op::Save => {
                let src = input_table(tables, &step.inputs[0])?;
                let path = step.params["path"].as_str().unwrap_or_default().to_string();
                let format = step.params.get("format").and_then(|f| f.as_str()).unwrap_or("csv");
                let bytes = match format {
                    "xpt" => {
                        let kinds = infer_xpt_kinds(&src);
                        xpt::write_xpt(&src, &kinds)?
                    }
                    _ => csv::write_csv(&src),
                };
                outputs.push(SavedFile { path, bytes });
            }
        }
        Ok(())
    }

    fn exec_sql_select(
        &self,
        step: &Step,
        tables: &HashMap<String, Table>,
        scalars: &HashMap<String, Value>,
        formats: &FormatRegistry,
    ) -> Result<Table, Diagnostic> {
        let base_name = step.inputs.first().cloned().unwrap_or_default();
        let base = tables.get(&base_name).cloned().ok_or_else(|| {
            Diagnostic::new(codes::SANS_RUNTIME_INPUT_NOT_FOUND, format!("table '{base_name}' is not available"))
                .with_loc(step.loc.clone())
        })?;

        let joins: Vec<(String, String, Table, String)> = step.params["joins"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|j| -> Result<_, Diagnostic> {
                let name = j["table"].as_str().unwrap_or_default().to_string();
                let table = tables.get(&name).cloned().ok_or_else(|| {
                    Diagnostic::new(codes::SANS_RUNTIME_INPUT_NOT_FOUND, format!("table '{name}' is not available"))
                        .with_loc(step.loc.clone())
                })?;
                Ok((
                    j["kind"].as_str().unwrap_or("inner").to_string(),
                    name,
                    table,
                    j["on"].as_str().unwrap_or_default().to_string(),
                ))
            })
            .collect::<Result<_, _>>()?;

        let select_list = json_str_array(&step.params["select"]);
        let where_clause = step.params.get("where").and_then(|w| w.as_str());
        let group_by = json_str_array(&step.params["group_by"]);

        ops::sql_select((&base_name, &base), &joins, &select_list, where_clause, &group_by, scalars, formats, &step.loc)
    }

    fn exec_data_step(
        &self,
        src: &Table,
        params: &Json,
        formats: &FormatRegistry,
        outer_scalars: &HashMap<String, Value>,
        loc: &Loc,
    ) -> Result<Table, Diagnostic> {
        let var = params["var"].as_str().unwrap_or_default().to_string();
        let from = params["from"].as_i64().unwrap_or(0);
        let to = params["to"].as_i64().unwrap_or(0);
        let by = params["by"].as_i64().unwrap_or(1);
        let body: Vec<(String, crate::ast::expr::Expr)> = params["body"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|b| -> Result<_, Diagnostic> {
                let target = b["target"].as_str().unwrap_or_default().to_string();
                let expr_text = b["expr"].as_str().unwrap_or_default();
                let expr = crate::ast::parser::parse_expr(expr_text, &loc.file, loc.line_start)?;
                Ok((target, expr))
            })
            .collect::<Result<_, _>>()?;

        let iterations: Vec<i64> = iter_range(from, to, by);
        let total_iterations = iterations.len().saturating_mul(src.rows.len().max(1));
        if total_iterations > self.config.loop_limit {
            return Err(Diagnostic::new(codes::SANS_RUNTIME_LOOP_LIMIT, format!("loop would run {total_iterations} iterations, exceeding the cap")).with_loc(loc.clone()));
        }

        let mut out = src.clone();
        for (_, target) in body.iter() {
            out.ensure_column(target);
        }
        let columns = out.columns.clone();

        for row in out.rows.iter_mut() {
            let mut scalars = outer_scalars.clone();
            for i in &iterations {
                scalars.insert(var.clone(), Value::Int((*i).into()));
                for (target, expr) in &body {
                    let v = {
                        let ctx = eval::EvalCtx { columns: &columns, row: row.as_slice(), scalars: &scalars, formats };
                        eval::eval(expr, &ctx)?
                    };
                    let idx = columns.iter().position(|c| c == target).unwrap();
                    row[idx] = v;
                }
            }
        }
        Ok(out)
    }
}

fn iter_range(from: i64, to: i64, by: i64) -> Vec<i64> {
    let mut out = Vec::new();
    if by == 0 {
        return out;
    }
    let mut i = from;
    if by > 0 {
        while i <= to {
            out.push(i);
            i += by;
        }
    } else {
        while i >= to {
            out.push(i);
            i += by;
        }
    }
    out
}

fn parse_assignments(params: &Json) -> Result<Vec<(String, String)>, Diagnostic> {
    Ok(params["assignments"]
        .as_array()
        .into_iter()
        .flatten()
        .map(|a| (a["target"].as_str().unwrap_or_default().to_string(), a["expr"].as_str().unwrap_or_default().to_string()))
        .collect())
}

fn json_str_array(v: &Json) -> Vec<String> {
    v.as_array().into_iter().flatten().filter_map(|x| x.as_str().map(|s| s.to_string())).collect()
}

fn record_evidence(runtime_evidence: &mut serde_json::Map<String, Json>, table_name: &str, table: &Table) {
    runtime_evidence.insert(table_name.to_string(), collect_table_evidence(table, &DEFAULT_EVIDENCE_CONFIG));
}

fn coercion_diagnostics_json(diags: &[CoercionDiagnostic]) -> Json {
    Json::Array(
        diags
            .iter()
            .map(|d| {
                json!({
                    "column": d.column,
                    "expected_type": d.expected_type.as_ref(),
                    "failure_count": d.failure_count,
                    "sample_rows": d.sample_rows,
                    "sample_values": d.sample_values,
                    "reason": d.reason,
                })
            })
            .collect(),
    )
}

/// Infers numeric vs. character kinds for XPT output from the table's
/// values: a column holding any STRING value is CHARACTER (width = the
/// longest rendered value, at least 1); otherwise NUMERIC.
fn infer_xpt_kinds(table: &Table) -> Vec<XptVarKind> {
    table
        .columns
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let mut is_char = false;
            let mut max_len = 1usize;
            for row in &table.rows {
                if let Value::String(s) = &row[i] {
                    is_char = true;
                    max_len = max_len.max(s.len());
                }
            }
            if is_char {
                XptVarKind::Character(max_len.min(xpt::CHAR_WIDTH_CAP))
            } else {
                XptVarKind::Numeric
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ids::stamp_identities;
    use crate::ir::step::{DatasourceDecl, Op, Step, StepOrUnknown};

    struct InlineReader;
    impl SourceReader for InlineReader {
        fn read_to_string(&self, _path: &Path) -> Result<String, Diagnostic> {
            Err(Diagnostic::new(codes::SANS_RUNTIME_INPUT_NOT_FOUND, "no filesystem in this test"))
        }
    }

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
    fn hello_world_end_to_end() {
        let mut doc = IRDoc::new();
        doc.tables = vec!["in".to_string()];
        doc.datasources.insert(
            "in".to_string(),
            DatasourceDecl {
                kind: DatasourceKind::InlineCsv,
                path: None,
                inline_text: Some("a,b\n1,10\n2,20\n3,30\n".to_string()),
                inline_sha256: None,
                columns: None,
            },
        );
        doc.steps = vec![
            StepOrUnknown::Step(mk_step(
                Op::Compute,
                &["in"],
                &["t1"],
                json!({"assignments": [{"target": "c", "expr": "a + b"}]}),
            )),
            StepOrUnknown::Step(mk_step(Op::Filter, &["t1"], &["out"], json!({"expr": "c > 20"}))),
            StepOrUnknown::Step(mk_step(Op::Save, &["out"], &[], json!({"path": "out.csv"}))),
        ];

        let reader = InlineReader;
        let engine = Engine::new(&reader, DEFAULT_ENGINE_CONFIG);
        let result = engine.run(&doc).unwrap();
        assert_eq!(result.outputs.len(), 1);
        let text = String::from_utf8(result.outputs[0].bytes.clone()).unwrap();
        assert_eq!(text, "a,b,c\n2,20,22\n3,30,33\n");
    }

    #[test]
    fn loop_limit_is_enforced() {
        let mut doc = IRDoc::new();
        doc.tables = vec!["in".to_string()];
        doc.datasources.insert(
            "in".to_string(),
            DatasourceDecl {
                kind: DatasourceKind::InlineCsv,
                path: None,
                inline_text: Some("a\n1\n".to_string()),
                inline_sha256: None,
                columns: None,
            },
        );
        doc.steps = vec![StepOrUnknown::Step(mk_step(
            Op::DataStep,
            &["in"],
            &["out"],
            json!({"var": "i", "from": 0, "to": 10, "by": 1, "body": [{"target": "a", "expr": "a + i"}]}),
        ))];

        let reader = InlineReader;
        let tiny_cap = EngineConfig { loop_limit: 5, nesting_depth_cap: 32 };
        let engine = Engine::new(&reader, tiny_cap);
        let err = engine.run(&doc).unwrap_err();
        assert_eq!(err.code, codes::SANS_RUNTIME_LOOP_LIMIT);
    }
}
