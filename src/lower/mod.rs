//! Script AST → IR lowering (spec §4.4).
//!
//! A `data X; set Y; ...; run;` block becomes `identity(Y→X)` plus any
//! interleaved `compute`/`filter`/`rename`/`select`/`assert` steps, chained
//! through synthetic intermediate table names until the final statement
//! writes to `X`. `proc` blocks dispatch by proc name to a single step.
//! Any lowering failure collapses the whole plan into one fatal
//! `UnknownBlockStep`, per spec §3/§9 ("fatal refusals replace the step
//! list entirely with that single sentinel").

pub mod format;
pub mod sql;

use serde_json::json;

use crate::ast::expr::Expr;
use crate::ast::parser::print_expr;
use crate::ast::script::Script;
use crate::ast::stmt::{unsupported_statement, Block, BlockKind, StatementKind};
use crate::error::{codes, Diagnostic, Loc, Severity};
use crate::ir::step::{IRDoc, Op, Step, StepOrUnknown, UnknownBlockStep};

/// Lowers a parsed [Script] into an [IRDoc]. Never fails: a lowering error
/// is captured as a fatal sentinel step instead of propagating, matching
/// the spec's "UnknownBlockStep replaces the plan" contract.
pub fn lower_script(script: &Script, declared_tables: &[String]) -> IRDoc {
    let mut doc = IRDoc::new();
    doc.tables = declared_tables.to_vec();

    match lower_blocks(&script.blocks) {
        Ok(steps) => doc.steps = steps.into_iter().map(StepOrUnknown::Step).collect(),
        Err(diag) => {
            doc.steps = vec![StepOrUnknown::Unknown(UnknownBlockStep {
                code: diag.code.to_string(),
                message: diag.message.clone(),
                severity: Severity::Fatal,
                loc: diag.loc.clone(),
            })];
        }
    }
    doc
}

fn lower_blocks(blocks: &[Block]) -> Result<Vec<Step>, Diagnostic> {
    let mut steps = Vec::new();
    let mut synth_counter = 0usize;
    for block in blocks {
        match block.kind {
            BlockKind::Data => lower_data_block(block, &mut steps, &mut synth_counter)?,
            BlockKind::Proc => lower_proc_block(block, &mut steps)?,
            BlockKind::Other => lower_other_block(block, &mut steps)?,
        }
    }
    Ok(steps)
}

fn fresh_table(counter: &mut usize, base: &str) -> String {
    *counter += 1;
    format!("__{base}_t{counter}")
}

fn step(op: Op, inputs: Vec<String>, outputs: Vec<String>, params: serde_json::Value, loc: Loc) -> Step {
    Step {
        id: format!("{}_{}", op.as_ref(), outputs.first().cloned().unwrap_or_default()),
        op,
        inputs,
        outputs,
        params,
        loc,
        transform_id: None,
        transform_class_id: None,
        step_id: None,
    }
}

fn lower_data_block(block: &Block, steps: &mut Vec<Step>, counter: &mut usize) -> Result<(), Diagnostic> {
    let out_name = match &block.statements.first().map(|s| &s.kind) {
        Some(StatementKind::Header { text }) => text.clone(),
        _ => {
            return Err(Diagnostic::new(
                codes::SANS_PARSE_UNSUPPORTED_STATEMENT,
                "data block missing header",
            )
            .with_loc(block.loc.clone()))
        }
    };

    let mut cur: Option<String> = None;
    let mut pending_computes: Vec<(String, Expr)> = Vec::new();
    let mut last_loc = block.loc.clone();

    // Collects at most one step: `stmts after this` determine whether the
    // upcoming output is the block's final output `out_name` or a fresh
    // intermediate table.
    let remaining_after = |idx: usize| -> bool {
        block.statements[idx + 1..]
            .iter()
            .any(|s| !matches!(s.kind, StatementKind::Run))
    };

    let mut skip_until: Option<usize> = None;

    let flush_computes =
        |pending: &mut Vec<(String, Expr)>, cur: &mut Option<String>, steps: &mut Vec<Step>, out: String, loc: &Loc| {
            if pending.is_empty() {
                return;
            }
            let input = cur.clone().expect("compute requires a source table");
            let assigns: Vec<serde_json::Value> = pending
                .iter()
                .map(|(t, e)| json!({"target": t, "expr": print_expr(e)}))
                .collect();
            steps.push(step(
                Op::Compute,
                vec![input],
                vec![out.clone()],
                json!({"assignments": assigns}),
                loc.clone(),
            ));
            *cur = Some(out);
            pending.clear();
        };

    for (i, stmt) in block.statements.iter().enumerate() {
        if let Some(until) = skip_until {
            if i <= until {
                continue;
            }
            skip_until = None;
        }
        last_loc = stmt.loc.clone();
        let is_last_producer = !remaining_after(i);
        let next_out = || {
            if is_last_producer {
                out_name.clone()
            } else {
                fresh_table(counter, &out_name)
            }
        };

        match &stmt.kind {
            StatementKind::Header { .. } | StatementKind::Run => {}
            StatementKind::Set { table } => {
                cur = Some(table.clone());
                if is_last_producer {
                    steps.push(step(
                        Op::Identity,
                        vec![table.clone()],
                        vec![out_name.clone()],
                        json!({}),
                        stmt.loc.clone(),
                    ));
                    cur = Some(out_name.clone());
                }
            }
            StatementKind::Compute { target, expr } => {
                pending_computes.push((target.clone(), expr.clone()));
                if is_last_producer {
                    let out = next_out();
                    flush_computes(&mut pending_computes, &mut cur, steps, out, &stmt.loc);
                }
            }
            StatementKind::Filter { expr } => {
                let out = next_out();
                flush_computes(
                    &mut pending_computes,
                    &mut cur,
                    steps,
                    fresh_table(counter, &out_name),
                    &stmt.loc,
                );
                let input = cur.clone().ok_or_else(|| missing_set(&stmt.loc))?;
                steps.push(step(
                    Op::Filter,
                    vec![input],
                    vec![out.clone()],
                    json!({"expr": print_expr(expr)}),
                    stmt.loc.clone(),
                ));
                cur = Some(out);
            }
            StatementKind::Keep { columns } => {
                let out = next_out();
                flush_computes(
                    &mut pending_computes,
                    &mut cur,
                    steps,
                    fresh_table(counter, &out_name),
                    &stmt.loc,
                );
                let input = cur.clone().ok_or_else(|| missing_set(&stmt.loc))?;
                steps.push(step(
                    Op::Select,
                    vec![input],
                    vec![out.clone()],
                    json!({"mode": "keep", "columns": columns}),
                    stmt.loc.clone(),
                ));
                cur = Some(out);
            }
            StatementKind::Drop { columns } => {
                let out = next_out();
                flush_computes(
                    &mut pending_computes,
                    &mut cur,
                    steps,
                    fresh_table(counter, &out_name),
                    &stmt.loc,
                );
                let input = cur.clone().ok_or_else(|| missing_set(&stmt.loc))?;
                steps.push(step(
                    Op::Select,
                    vec![input],
                    vec![out.clone()],
                    json!({"mode": "drop", "columns": columns}),
                    stmt.loc.clone(),
                ));
                cur = Some(out);
            }
            StatementKind::Rename { pairs } => {
                let out = next_out();
                flush_computes(
                    &mut pending_computes,
                    &mut cur,
                    steps,
                    fresh_table(counter, &out_name),
                    &stmt.loc,
                );
                let input = cur.clone().ok_or_else(|| missing_set(&stmt.loc))?;
                let pairs_json: Vec<serde_json::Value> =
                    pairs.iter().map(|(a, b)| json!({"from": a, "to": b})).collect();
                steps.push(step(
                    Op::Rename,
                    vec![input],
                    vec![out.clone()],
                    json!({"pairs": pairs_json}),
                    stmt.loc.clone(),
                ));
                cur = Some(out);
            }
            StatementKind::Assert { expr, message } => {
                let out = next_out();
                flush_computes(
                    &mut pending_computes,
                    &mut cur,
                    steps,
                    fresh_table(counter, &out_name),
                    &stmt.loc,
                );
                let input = cur.clone().ok_or_else(|| missing_set(&stmt.loc))?;
                let mut params = serde_json::Map::new();
                params.insert("expr".to_string(), json!(print_expr(expr)));
                if let Some(m) = message {
                    params.insert("message".to_string(), json!(m));
                }
                steps.push(step(
                    Op::Assert,
                    vec![input],
                    vec![out.clone()],
                    serde_json::Value::Object(params),
                    stmt.loc.clone(),
                ));
                cur = Some(out);
            }
            StatementKind::LetScalar { name, expr } => {
                let input = cur.clone().ok_or_else(|| missing_set(&stmt.loc))?;
                steps.push(step(
                    Op::LetScalar,
                    vec![input],
                    vec![],
                    json!({"name": name, "expr": print_expr(expr)}),
                    stmt.loc.clone(),
                ));
            }
            StatementKind::DoHeader { var, from, to, by } => {
                let (from_v, to_v, by_v) = parse_loop_bounds(from, to, by.as_deref(), &stmt.loc)?;
                let end_idx = find_matching_end(block, i)?;
                let body = lower_loop_body(&block.statements[i + 1..end_idx])?;
                let loop_is_last_producer = block.statements[end_idx + 1..]
                    .iter()
                    .all(|s| matches!(s.kind, StatementKind::Run));
                let out = if loop_is_last_producer { out_name.clone() } else { fresh_table(counter, &out_name) };
                flush_computes(
                    &mut pending_computes,
                    &mut cur,
                    steps,
                    fresh_table(counter, &out_name),
                    &stmt.loc,
                );
                let input = cur.clone().ok_or_else(|| missing_set(&stmt.loc))?;
                steps.push(step(
                    Op::DataStep,
                    vec![input],
                    vec![out.clone()],
                    json!({"var": var, "from": from_v, "to": to_v, "by": by_v, "body": body}),
                    stmt.loc.clone(),
                ));
                cur = Some(out);
                skip_until = Some(end_idx);
            }
            StatementKind::EndDo => {
                return Err(unsupported_statement("'end' without matching 'do'", stmt.loc.clone()));
            }
            StatementKind::Output { .. } | StatementKind::By { .. } | StatementKind::Class { .. }
            | StatementKind::Var { .. } | StatementKind::Id { .. } => {
                return Err(unsupported_statement("proc-only statement in data block", stmt.loc.clone()));
            }
            StatementKind::Raw { text } | StatementKind::Unrecognized { text } => {
                return Err(unsupported_statement(text, stmt.loc.clone()));
            }
        }
    }

    if cur.as_deref() != Some(out_name.as_str()) {
        // No statement actually produced `out_name` (e.g. an empty body).
        return Err(Diagnostic::new(
            codes::SANS_PARSE_UNSUPPORTED_STATEMENT,
            format!("data block for '{out_name}' never produced its output table"),
        )
        .with_loc(last_loc));
    }
    Ok(())
}

fn parse_loop_bounds(
    from: &str,
    to: &str,
    by: Option<&str>,
    loc: &Loc,
) -> Result<(i64, i64, i64), Diagnostic> {
    let bad = |which: &str| {
        Diagnostic::new(
            codes::SANS_PARSE_LOOP_BOUND_UNSUPPORTED,
            format!("loop '{which}' bound must be a constant integer"),
        )
        .with_loc(loc.clone())
    };
    let from_v: i64 = from.parse().map_err(|_| bad("from"))?;
    let to_v: i64 = to.parse().map_err(|_| bad("to"))?;
    let by_v: i64 = match by {
        Some(b) => b.parse().map_err(|_| bad("by"))?,
        None => 1,
    };
    if by_v == 0 {
        return Err(bad("by"));
    }
    Ok((from_v, to_v, by_v))
}

fn find_matching_end(block: &Block, start_idx: usize) -> Result<usize, Diagnostic> {
    for (offset, stmt) in block.statements[start_idx + 1..].iter().enumerate() {
        match &stmt.kind {
            StatementKind::DoHeader { .. } => {
                return Err(Diagnostic::new(
                    codes::SANS_PARSE_LOOP_BOUND_UNSUPPORTED,
                    "nested 'do' loops are not supported",
                )
                .with_loc(stmt.loc.clone()))
            }
            StatementKind::EndDo => return Ok(start_idx + 1 + offset),
            _ => {}
        }
    }
    Err(Diagnostic::new(
        codes::SANS_PARSE_LOOP_BOUND_UNSUPPORTED,
        "'do' loop has no matching 'end'",
    )
    .with_loc(block.loc.clone()))
}

fn lower_loop_body(stmts: &[crate::ast::stmt::Statement]) -> Result<Vec<serde_json::Value>, Diagnostic> {
    stmts
        .iter()
        .map(|stmt| match &stmt.kind {
            StatementKind::Compute { target, expr } => {
                Ok(json!({"target": target, "expr": print_expr(expr)}))
            }
            other => Err(unsupported_statement(&format!("{other:?}"), stmt.loc.clone())),
        })
        .collect()
}

fn missing_set(loc: &Loc) -> Diagnostic {
    Diagnostic::new(codes::SANS_PARSE_UNSUPPORTED_STATEMENT, "statement before 'set'").with_loc(loc.clone())
}

fn lower_proc_block(block: &Block, steps: &mut Vec<Step>) -> Result<(), Diagnostic> {
    let proc = block.proc_name.clone().unwrap_or_default();
    let header = match block.statements.first().map(|s| &s.kind) {
        Some(StatementKind::Header { text }) => text.clone(),
        _ => String::new(),
    };
    let (data_in, data_out) = parse_data_out(&header, &block.loc)?;

    match proc.as_str() {
        "sort" => lower_proc_sort(block, &data_in, &data_out, steps),
        "summary" | "means" => lower_proc_summary(block, &data_in, &data_out, steps),
        "transpose" => lower_proc_transpose(block, &data_in, &data_out, steps),
        "sql" => lower_proc_sql(block, steps),
        "format" => {
            steps.extend(format::lower_format_block(block)?);
            Ok(())
        }
        other => Err(Diagnostic::new(
            codes::SANS_PARSE_UNSUPPORTED_PROC,
            format!("unsupported proc '{other}'"),
        )
        .with_loc(block.loc.clone())),
    }
}

fn parse_data_out(header: &str, loc: &Loc) -> Result<(String, String), Diagnostic> {
    let mut data = None;
    let mut out = None;
    for tok in header.split_whitespace() {
        if let Some(v) = tok.strip_prefix("data=") {
            data = Some(v.to_string());
        } else if let Some(v) = tok.strip_prefix("out=") {
            out = Some(v.to_string());
        }
    }
    match (data, out) {
        (Some(d), Some(o)) => Ok((d, o)),
        _ => Err(Diagnostic::new(
            codes::SANS_PARSE_UNSUPPORTED_STATEMENT,
            "proc header requires data= and out=",
        )
        .with_loc(loc.clone())),
    }
}

fn lower_proc_sort(
    block: &Block,
    data_in: &str,
    data_out: &str,
    steps: &mut Vec<Step>,
) -> Result<(), Diagnostic> {
    let header = match block.statements.first().map(|s| &s.kind) {
        Some(StatementKind::Header { text }) => text.clone(),
        _ => String::new(),
    };
    let nodupkey = header.to_ascii_lowercase().contains("nodupkey");

    let mut by = Vec::new();
    for stmt in &block.statements {
        if let StatementKind::By { columns } = &stmt.kind {
            by = columns
                .iter()
                .map(|(c, desc)| json!({"col": c, "desc": desc}))
                .collect();
        }
    }
    if by.is_empty() {
        return Err(Diagnostic::new(
            codes::SANS_PARSE_UNSUPPORTED_STATEMENT,
            "proc sort requires a 'by' statement",
        )
        .with_loc(block.loc.clone()));
    }

    let mut params = serde_json::Map::new();
    params.insert("by".to_string(), json!(by));
    if nodupkey {
        params.insert("nodupkey".to_string(), json!(true));
    }
    steps.push(step(
        Op::Sort,
        vec![data_in.to_string()],
        vec![data_out.to_string()],
        serde_json::Value::Object(params),
        block.loc.clone(),
    ));
    Ok(())
}

fn lower_proc_summary(
    block: &Block,
    data_in: &str,
    data_out: &str,
    steps: &mut Vec<Step>,
) -> Result<(), Diagnostic> {
    let mut class = Vec::new();
    let mut var = Vec::new();
    let mut stats = Vec::new();
    for stmt in &block.statements {
        match &stmt.kind {
            StatementKind::Class { columns } => class = columns.clone(),
            StatementKind::Var { columns } => var = columns.clone(),
            StatementKind::Output { stats: s } => stats = s.clone(),
            _ => {}
        }
    }
    if var.is_empty() || stats.is_empty() {
        return Err(Diagnostic::new(
            codes::SANS_PARSE_UNSUPPORTED_STATEMENT,
            "proc summary/means requires 'var' and 'output' statements",
        )
        .with_loc(block.loc.clone()));
    }
    steps.push(step(
        Op::Aggregate,
        vec![data_in.to_string()],
        vec![data_out.to_string()],
        json!({"class": class, "var": var, "stats": stats}),
        block.loc.clone(),
    ));
    Ok(())
}

fn lower_proc_transpose(
    block: &Block,
    data_in: &str,
    data_out: &str,
    steps: &mut Vec<Step>,
) -> Result<(), Diagnostic> {
    let mut by = Vec::new();
    let mut id = None;
    let mut var = Vec::new();
    for stmt in &block.statements {
        match &stmt.kind {
            StatementKind::By { columns } => by = columns.iter().map(|(c, _)| c.clone()).collect(),
            StatementKind::Id { column } => id = Some(column.clone()),
            StatementKind::Var { columns } => var = columns.clone(),
            _ => {}
        }
    }
    let id = id.ok_or_else(|| {
        Diagnostic::new(
            codes::SANS_PARSE_UNSUPPORTED_STATEMENT,
            "proc transpose requires an 'id' statement",
        )
        .with_loc(block.loc.clone())
    })?;
    steps.push(step(
        Op::Transpose,
        vec![data_in.to_string()],
        vec![data_out.to_string()],
        json!({"by": by, "id": id, "var": var}),
        block.loc.clone(),
    ));
    Ok(())
}

fn lower_proc_sql(block: &Block, steps: &mut Vec<Step>) -> Result<(), Diagnostic> {
    let mut body_lines = Vec::new();
    let mut out_table = None;
    for stmt in &block.statements {
        match &stmt.kind {
            StatementKind::Header { .. } | StatementKind::Run => {}
            StatementKind::Raw { text } => {
                let lower = text.to_ascii_lowercase();
                if let Some(rest) = lower.strip_prefix("create table ") {
                    if let Some(as_idx) = rest.find(" as ") {
                        out_table = Some(rest[..as_idx].trim().to_string());
                        let sel_start = text.to_ascii_lowercase().find(" as ").unwrap() + 4;
                        body_lines.push(text[sel_start..].to_string());
                        continue;
                    }
                }
                body_lines.push(text.clone());
            }
            _ => {}
        }
    }
    let body = body_lines.join(" ");
    let mut sql_step = sql::lower_sql_select(&body, &block.loc)?;
    if let Some(out) = out_table {
        sql_step.outputs = vec![out];
    }
    steps.push(sql_step);
    Ok(())
}

fn lower_other_block(block: &Block, steps: &mut Vec<Step>) -> Result<(), Diagnostic> {
    for stmt in &block.statements {
        if let StatementKind::LetScalar { name, expr } = &stmt.kind {
            steps.push(step(
                Op::LetScalar,
                vec![],
                vec![],
                json!({"name": name, "expr": print_expr(expr)}),
                stmt.loc.clone(),
            ));
            continue;
        }
        return Err(unsupported_statement(
            &format!("{:?}", stmt.kind),
            stmt.loc.clone(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::script::{parse_script, NoIncludes};

    fn lower(src: &str, tables: &[&str]) -> IRDoc {
        let script = parse_script(src, "t.sans", true, &NoIncludes).unwrap();
        lower_script(&script, &tables.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn hello_world_compute_filter() {
        let doc = lower("data out; set in; c = a + b; if c > 20; run;", &["in"]);
        assert!(!doc.is_fatal_refusal());
        let ops: Vec<Op> = doc.real_steps().map(|s| s.op).collect();
        assert_eq!(ops, vec![Op::Compute, Op::Filter]);
        let last = doc.real_steps().last().unwrap();
        assert_eq!(last.outputs, vec!["out".to_string()]);
    }

    #[test]
    fn proc_sort_lowers_to_sort_step() {
        let doc = lower("proc sort data=in out=out; by a desc; run;", &["in"]);
        let steps: Vec<_> = doc.real_steps().collect();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].op, Op::Sort);
        assert_eq!(steps[0].params["by"][0]["desc"], true);
    }

    #[test]
    fn unsupported_proc_becomes_fatal_sentinel() {
        let doc = lower("proc nonsense data=in out=out; run;", &["in"]);
        assert!(doc.is_fatal_refusal());
    }

    #[test]
    fn bounded_do_loop_lowers_to_data_step() {
        let doc = lower(
            "data out; set in; do i = 1 to 3 by 1; total = total + i; end; run;",
            &["in"],
        );
        assert!(!doc.is_fatal_refusal());
        let steps: Vec<_> = doc.real_steps().collect();
        let data_step = steps.iter().find(|s| s.op == Op::DataStep).unwrap();
        assert_eq!(data_step.params["from"], 1);
        assert_eq!(data_step.params["to"], 3);
        assert_eq!(data_step.params["body"][0]["target"], "total");
    }

    #[test]
    fn unbounded_loop_is_refused() {
        let doc = lower(
            "data out; set in; do i = 1 to n; x = x + i; end; run;",
            &["in"],
        );
        assert!(doc.is_fatal_refusal());
    }

    #[test]
    fn pure_identity_block() {
        let doc = lower("data out; set in; run;", &["in"]);
        let steps: Vec<_> = doc.real_steps().collect();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].op, Op::Identity);
    }
}
