//! Statement AST for the legacy block dialect (spec §4.3, §4.4).
//!
//! One [Statement] per `;`-delimited line inside a [crate::ast::segment::RawBlock].
//! Parsing here is deliberately narrow: only the statement shapes spec §4.4
//! names are recognized; everything else becomes `StatementKind::Unrecognized`,
//! which [crate::lower] turns into the appropriate `SANS_PARSE_*` refusal.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::ast::expr::Expr;
use crate::ast::legacy::parse_legacy_predicate;
use crate::ast::parser::parse_expr;
use crate::ast::segment::{RawBlock, RawBlockKind, RawStatement};
use crate::error::{codes, Diagnostic, Loc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Data,
    Proc,
    Other,
}

impl From<RawBlockKind> for BlockKind {
    fn from(k: RawBlockKind) -> Self {
        match k {
            RawBlockKind::Data => BlockKind::Data,
            RawBlockKind::Proc => BlockKind::Proc,
            RawBlockKind::Other => BlockKind::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub kind: BlockKind,
    /// For a `data X;` or `proc NAME data=IN out=OUT;` header, the proc
    /// name (`sort`, `summary`, `means`, `transpose`, `sql`, `format`) or
    /// `None` for `data`/`other` blocks.
    pub proc_name: Option<String>,
    pub statements: Vec<Statement>,
    pub loc: Loc,
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StatementKind,
    pub loc: Loc,
}

#[derive(Debug, Clone)]
pub enum StatementKind {
    Header { text: String },
    Set { table: String },
    Compute { target: String, expr: Expr },
    Filter { expr: Expr },
    Keep { columns: Vec<String> },
    Drop { columns: Vec<String> },
    Rename { pairs: Vec<(String, String)> },
    Assert { expr: Expr, message: Option<String> },
    LetScalar { name: String, expr: Expr },
    By { columns: Vec<(String, bool)> },
    Class { columns: Vec<String> },
    Var { columns: Vec<String> },
    Id { column: String },
    Output { stats: Vec<String> },
    /// `do VAR = FROM to TO [by STEP];` — only constant-integer bounds are
    /// accepted; anything else is refused by `lower` with
    /// `SANS_PARSE_LOOP_BOUND_UNSUPPORTED` (spec §4.4 control-flow lowering
    /// is deliberately limited to this one bounded-loop shape).
    DoHeader { var: String, from: String, to: String, by: Option<String> },
    EndDo,
    Run,
    /// Raw text for statements whose meaning depends on the enclosing proc
    /// (`proc sql`'s body, `proc format`'s `value` lines) — parsed further
    /// by `lower`.
    Raw { text: String },
    Unrecognized { text: String },
}

static DATA_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^data\s+([A-Za-z_][A-Za-z0-9_.]*)\s*$").unwrap());
static PROC_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^proc\s+(\w+)\s*(.*)$").unwrap()
});
static SET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^set\s+([A-Za-z_][A-Za-z0-9_.]*)\s*$").unwrap());
static ASSIGN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.+)$").unwrap());
static IF_FILTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^if\s+(.+)$").unwrap());
static KEEP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^keep\s+(.+)$").unwrap());
static DROP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^drop\s+(.+)$").unwrap());
static RENAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^rename\s+(.+)$").unwrap());
static ASSERT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)^assert\s+(.+?)(?:\s*,\s*"(.*)")?$"#).unwrap());
static LET_SCALAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^let\s+([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.+)$").unwrap());
static BY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^by\s+(.+)$").unwrap());
static CLASS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^class\s+(.+)$").unwrap());
static VAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^var\s+(.+)$").unwrap());
static ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^id\s+([A-Za-z_][A-Za-z0-9_]*)\s*$").unwrap());
static OUTPUT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^output\s*(.*)$").unwrap());
static RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^run$").unwrap());
static DO_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^do\s+([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(\S+)\s+to\s+(\S+)(?:\s+by\s+(\S+))?\s*$").unwrap()
});
static END_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^end$").unwrap());

/// Converts a segmented [RawBlock] into a [Block], parsing each statement's
/// text into a [StatementKind]. `legacy` selects whether bare predicates are
/// parsed via the legacy translator or the strict parser directly.
pub fn parse_block(raw: RawBlock, legacy: bool) -> Result<Block, Diagnostic> {
    let mut statements = Vec::with_capacity(raw.statements.len());
    let mut proc_name = None;

    for (i, stmt) in raw.statements.into_iter().enumerate() {
        if i == 0 {
            if let Some(caps) = DATA_HEADER_RE.captures(&stmt.text) {
                statements.push(Statement {
                    kind: StatementKind::Header { text: caps[1].to_string() },
                    loc: stmt.loc,
                });
                continue;
            }
            if let Some(caps) = PROC_HEADER_RE.captures(&stmt.text) {
                proc_name = Some(caps[1].to_ascii_lowercase());
                statements.push(Statement {
                    kind: StatementKind::Header { text: caps[2].trim().to_string() },
                    loc: stmt.loc,
                });
                continue;
            }
        }
        statements.push(parse_statement(stmt, legacy)?);
    }

    Ok(Block { kind: raw.kind.into(), proc_name, statements, loc: raw.loc })
}

fn parse_statement(stmt: RawStatement, legacy: bool) -> Result<Statement, Diagnostic> {
    let text = stmt.text.clone();
    let loc = stmt.loc.clone();
    let line = loc.line_start;
    let file = loc.file.clone();

    let parse_pred = |s: &str| -> Result<Expr, Diagnostic> {
        if legacy {
            parse_legacy_predicate(s, &file, line)
        } else {
            parse_expr(s, &file, line)
        }
    };

    if RUN_RE.is_match(&text) {
        return Ok(Statement { kind: StatementKind::Run, loc });
    }
    if let Some(caps) = SET_RE.captures(&text) {
        return Ok(Statement {
            kind: StatementKind::Set { table: caps[1].to_string() },
            loc,
        });
    }
    if let Some(caps) = IF_FILTER_RE.captures(&text) {
        let expr = parse_pred(caps[1].trim())?;
        return Ok(Statement { kind: StatementKind::Filter { expr }, loc });
    }
    if let Some(caps) = KEEP_RE.captures(&text) {
        return Ok(Statement {
            kind: StatementKind::Keep { columns: split_names(&caps[1]) },
            loc,
        });
    }
    if let Some(caps) = DROP_RE.captures(&text) {
        return Ok(Statement {
            kind: StatementKind::Drop { columns: split_names(&caps[1]) },
            loc,
        });
    }
    if let Some(caps) = RENAME_RE.captures(&text) {
        let pairs = split_names(&caps[1])
            .into_iter()
            .filter_map(|tok| tok.split_once('=').map(|(a, b)| (a.to_string(), b.to_string())))
            .collect();
        return Ok(Statement { kind: StatementKind::Rename { pairs }, loc });
    }
    if let Some(caps) = ASSERT_RE.captures(&text) {
        let expr = parse_pred(caps[1].trim())?;
        let message = caps.get(2).map(|m| m.as_str().to_string());
        return Ok(Statement { kind: StatementKind::Assert { expr, message }, loc });
    }
    if let Some(caps) = LET_SCALAR_RE.captures(&text) {
        let expr = parse_pred(caps[2].trim())?;
        return Ok(Statement {
            kind: StatementKind::LetScalar { name: caps[1].to_string(), expr },
            loc,
        });
    }
    if let Some(caps) = BY_RE.captures(&text) {
        let tokens = split_names(&caps[1]);
        let mut columns = Vec::new();
        let mut iter = tokens.into_iter().peekable();
        while let Some(tok) = iter.next() {
            let is_desc = matches!(
                iter.peek().map(|t| t.to_ascii_lowercase()).as_deref(),
                Some("desc") | Some("descending")
            );
            if is_desc {
                iter.next();
            }
            columns.push((tok, is_desc));
        }
        return Ok(Statement { kind: StatementKind::By { columns }, loc });
    }
    if let Some(caps) = CLASS_RE.captures(&text) {
        return Ok(Statement {
            kind: StatementKind::Class { columns: split_names(&caps[1]) },
            loc,
        });
    }
    if let Some(caps) = VAR_RE.captures(&text) {
        return Ok(Statement {
            kind: StatementKind::Var { columns: split_names(&caps[1]) },
            loc,
        });
    }
    if let Some(caps) = ID_RE.captures(&text) {
        return Ok(Statement { kind: StatementKind::Id { column: caps[1].to_string() }, loc });
    }
    if let Some(caps) = OUTPUT_RE.captures(&text) {
        return Ok(Statement {
            kind: StatementKind::Output { stats: split_names(&caps[1]) },
            loc,
        });
    }
    if let Some(caps) = DO_HEADER_RE.captures(&text) {
        return Ok(Statement {
            kind: StatementKind::DoHeader {
                var: caps[1].to_string(),
                from: caps[2].to_string(),
                to: caps[3].to_string(),
                by: caps.get(4).map(|m| m.as_str().to_string()),
            },
            loc,
        });
    }
    if END_RE.is_match(&text) {
        return Ok(Statement { kind: StatementKind::EndDo, loc });
    }
    if let Some(caps) = ASSIGN_RE.captures(&text) {
        let target = caps[1].to_string();
        let expr = parse_pred(caps[2].trim())?;
        return Ok(Statement { kind: StatementKind::Compute { target, expr }, loc });
    }

    // Anything proc-specific (sql body lines, format `value` lines) or
    // otherwise unrecognized is passed through as Raw text; `lower`
    // decides, in context, whether it is a supported shape or a refusal.
    Ok(Statement { kind: StatementKind::Raw { text }, loc })
}

fn split_names(s: &str) -> Vec<String> {
    s.split(|c: char| c.is_whitespace() || c == ',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Used by `lower` to turn a trailing `Raw` statement it cannot place into
/// a refusal with the right code.
pub fn unsupported_statement(text: &str, loc: Loc) -> Diagnostic {
    Diagnostic::new(
        codes::SANS_PARSE_UNSUPPORTED_STATEMENT,
        format!("unsupported statement: {text}"),
    )
    .with_loc(loc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::segment::{segment_blocks, segment_statements};

    fn block(src: &str) -> Block {
        let stmts = segment_statements(src, "t.sans");
        let raw = segment_blocks(stmts).remove(0);
        parse_block(raw, true).unwrap()
    }

    #[test]
    fn data_block_header_and_set() {
        let b = block("data out; set in; c = a + b; run;");
        assert!(matches!(b.statements[0].kind, StatementKind::Header { .. }));
        assert!(matches!(b.statements[1].kind, StatementKind::Set { .. }));
        assert!(matches!(b.statements[2].kind, StatementKind::Compute { .. }));
        assert!(matches!(b.statements[3].kind, StatementKind::Run));
    }

    #[test]
    fn if_filter_uses_legacy_predicate() {
        let b = block("data out; set in; if a gt 2; run;");
        match &b.statements[2].kind {
            StatementKind::Filter { expr } => {
                assert!(matches!(expr.kind, crate::ast::expr::ExprKind::BinOp { .. }));
            }
            other => panic!("expected filter, got {other:?}"),
        }
    }

    #[test]
    fn proc_sort_header_captures_proc_name() {
        let b = block("proc sort data=in out=out; by a desc; run;");
        assert_eq!(b.proc_name.as_deref(), Some("sort"));
        assert!(matches!(b.statements[1].kind, StatementKind::By { .. }));
    }

    #[test]
    fn keep_parses_column_list() {
        let b = block("data out; set in; keep a b c; run;");
        match &b.statements[2].kind {
            StatementKind::Keep { columns } => {
                assert_eq!(columns, &vec!["a".to_string(), "b".to_string(), "c".to_string()])
            }
            other => panic!("expected keep, got {other:?}"),
        }
    }
}
