//! Canonical script formatter (spec §4.3 "canonical form"): re-renders a
//! parsed [Script] as strict-dialect text — one statement per line, a
//! single canonical spelling for every statement shape — so that two
//! scripts lowering to the same IR also format identically.

use crate::ast::parser::print_expr;
use crate::ast::script::Script;
use crate::ast::stmt::{Block, BlockKind, Statement, StatementKind};

pub fn fmt_canonical(script: &Script) -> String {
    let mut out = String::new();
    for block in &script.blocks {
        fmt_block(block, &mut out);
    }
    out
}

fn fmt_block(block: &Block, out: &mut String) {
    for stmt in &block.statements {
        fmt_statement(block.kind, stmt, out);
    }
}

fn fmt_statement(block_kind: BlockKind, stmt: &Statement, out: &mut String) {
    match &stmt.kind {
        StatementKind::Header { text } => match block_kind {
            BlockKind::Data => out.push_str(&format!("data {text};\n")),
            BlockKind::Proc => out.push_str(&format!("proc {text};\n")),
            BlockKind::Other => {}
        },
        StatementKind::Set { table } => out.push_str(&format!("set {table};\n")),
        StatementKind::Compute { target, expr } => out.push_str(&format!("{target} = {};\n", print_expr(expr))),
        StatementKind::Filter { expr } => out.push_str(&format!("if {};\n", print_expr(expr))),
        StatementKind::Keep { columns } => out.push_str(&format!("keep {};\n", columns.join(" "))),
        StatementKind::Drop { columns } => out.push_str(&format!("drop {};\n", columns.join(" "))),
        StatementKind::Rename { pairs } => {
            let body = pairs.iter().map(|(a, b)| format!("{a}={b}")).collect::<Vec<_>>().join(" ");
            out.push_str(&format!("rename {body};\n"));
        }
        StatementKind::Assert { expr, message } => match message {
            Some(m) => out.push_str(&format!("assert {}, \"{m}\";\n", print_expr(expr))),
            None => out.push_str(&format!("assert {};\n", print_expr(expr))),
        },
        StatementKind::LetScalar { name, expr } => out.push_str(&format!("let {name} = {};\n", print_expr(expr))),
        StatementKind::By { columns } => {
            let body = columns
                .iter()
                .map(|(c, desc)| if *desc { format!("{c} desc") } else { c.clone() })
                .collect::<Vec<_>>()
                .join(" ");
            out.push_str(&format!("by {body};\n"));
        }
        StatementKind::Class { columns } => out.push_str(&format!("class {};\n", columns.join(" "))),
        StatementKind::Var { columns } => out.push_str(&format!("var {};\n", columns.join(" "))),
        StatementKind::Id { column } => out.push_str(&format!("id {column};\n")),
        StatementKind::Output { stats } => out.push_str(&format!("output {};\n", stats.join(" "))),
        StatementKind::DoHeader { var, from, to, by } => match by {
            Some(b) => out.push_str(&format!("do {var} = {from} to {to} by {b};\n")),
            None => out.push_str(&format!("do {var} = {from} to {to};\n")),
        },
        StatementKind::EndDo => out.push_str("end;\n"),
        StatementKind::Run => out.push_str("run;\n"),
        StatementKind::Raw { text } | StatementKind::Unrecognized { text } => out.push_str(&format!("{text};\n")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::script::{parse_script, NoIncludes};

    #[test]
    fn round_trips_a_hello_world_script() {
        let script = parse_script("data out; set in; c = a + b; if c > 20; run;", "t.sans", true, &NoIncludes).unwrap();
        let text = fmt_canonical(&script);
        assert_eq!(text, "data out;\nset in;\nc = a + b;\nif c > 20;\nrun;\n");
    }

    #[test]
    fn formatting_is_idempotent() {
        let script = parse_script("proc sort data=in out=out; by a desc; run;", "t.sans", true, &NoIncludes).unwrap();
        let once = fmt_canonical(&script);
        let reparsed = parse_script(&once, "t.sans", true, &NoIncludes).unwrap();
        assert_eq!(once, fmt_canonical(&reparsed));
    }
}
