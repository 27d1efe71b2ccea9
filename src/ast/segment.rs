//! Statement/block segmenter for the legacy dialect (spec §4.3).
//!
//! Scans raw source text into `;`-terminated statements, grouped into
//! blocks of kind `data`/`proc`/`other`, ended by a `run;` statement or
//! end-of-file. `;` inside string literals or comments does not terminate a
//! statement; block comments (`/* ... */`) and line comments (`* ... ;`) are
//! stripped before block grouping but `Loc` line numbers are computed
//! against the original text.

use crate::error::Loc;

/// One raw statement: its text (trimmed, comments stripped) and the line
/// range it came from in the original file.
#[derive(Debug, Clone, PartialEq)]
pub struct RawStatement {
    pub text: String,
    pub loc: Loc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawBlockKind {
    Data,
    Proc,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    pub kind: RawBlockKind,
    pub statements: Vec<RawStatement>,
    pub loc: Loc,
}

/// Splits `source` into `;`-delimited statements, tracking string/comment
/// state so that a `;` inside a quoted string or a comment does not split.
/// Returns statements with block/line comments already stripped from their
/// text. Tolerates a missing trailing `;` (the final partial statement, if
/// non-blank, is still emitted).
pub fn segment_statements(source: &str, file: &str) -> Vec<RawStatement> {
    let mut statements = Vec::new();
    let mut buf = String::new();
    let mut buf_start_line = 1;
    let mut line = 1;

    let mut in_single = false;
    let mut in_double = false;
    let mut in_block_comment = false;
    let mut in_line_comment = false;
    let mut escape = false;

    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            line += 1;
        }

        if in_block_comment {
            if c == '*' && chars.get(i + 1) == Some(&'/') {
                in_block_comment = false;
                i += 2;
                continue;
            }
            i += 1;
            continue;
        }
        if in_line_comment {
            if c == ';' {
                in_line_comment = false;
            }
            i += 1;
            continue;
        }
        if in_single {
            buf.push(c);
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '\'' {
                in_single = false;
            }
            i += 1;
            continue;
        }
        if in_double {
            buf.push(c);
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_double = false;
            }
            i += 1;
            continue;
        }

        // Block comment start.
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            in_block_comment = true;
            i += 2;
            continue;
        }
        // Line comment: a bare `*` at the start of a (trimmed) statement.
        if c == '*' && buf.trim().is_empty() {
            in_line_comment = true;
            i += 1;
            continue;
        }
        if c == '\'' {
            in_single = true;
            buf.push(c);
            i += 1;
            continue;
        }
        if c == '"' {
            in_double = true;
            buf.push(c);
            i += 1;
            continue;
        }
        if c == ';' {
            let text = buf.trim().to_string();
            if !text.is_empty() {
                statements.push(RawStatement {
                    text,
                    loc: Loc::new(file, buf_start_line, line),
                });
            }
            buf.clear();
            buf_start_line = line;
            i += 1;
            continue;
        }

        if buf.trim().is_empty() {
            buf_start_line = line;
        }
        buf.push(c);
        i += 1;
    }

    let tail = buf.trim().to_string();
    if !tail.is_empty() {
        statements.push(RawStatement {
            text: tail,
            loc: Loc::new(file, buf_start_line, line),
        });
    }
    statements
}

/// Groups a flat statement list into blocks. A block starts at a `data` or
/// `proc` keyword statement (case-insensitive) and ends at a `run` statement
/// or end-of-input; any statement outside such a block is its own `Other`
/// block of one statement (matching legacy scripts that mix bare
/// assignments with data/proc steps).
pub fn segment_blocks(statements: Vec<RawStatement>) -> Vec<RawBlock> {
    let mut blocks = Vec::new();
    let mut iter = statements.into_iter().peekable();

    while let Some(stmt) = iter.next() {
        let head = first_word(&stmt.text).to_ascii_lowercase();
        if head == "data" || head == "proc" {
            let kind = if head == "data" { RawBlockKind::Data } else { RawBlockKind::Proc };
            let mut members = vec![stmt.clone()];
            let start_loc = stmt.loc.clone();
            let mut end_loc = stmt.loc;
            while let Some(next) = iter.peek() {
                let is_run = first_word(&next.text).to_ascii_lowercase() == "run";
                let next = iter.next().unwrap();
                end_loc = next.loc.clone();
                members.push(next);
                if is_run {
                    break;
                }
            }
            blocks.push(RawBlock {
                kind,
                loc: start_loc.merge(&end_loc),
                statements: members,
            });
        } else {
            blocks.push(RawBlock {
                kind: RawBlockKind::Other,
                loc: stmt.loc.clone(),
                statements: vec![stmt],
            });
        }
    }
    blocks
}

fn first_word(text: &str) -> &str {
    text.split(|c: char| c.is_whitespace() || c == ';')
        .find(|s| !s.is_empty())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_semicolons() {
        let stmts = segment_statements("data out; set in; run;", "t.sans");
        assert_eq!(stmts.len(), 3);
        assert_eq!(stmts[0].text, "data out");
    }

    #[test]
    fn ignores_semicolon_inside_string() {
        let stmts = segment_statements("x = 'a;b'; run;", "t.sans");
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0].text, "x = 'a;b'");
    }

    #[test]
    fn strips_block_comment() {
        let stmts = segment_statements("x = 1; /* comment; with semi */ y = 2; run;", "t.sans");
        assert_eq!(stmts.len(), 3);
        assert_eq!(stmts[1].text, "y = 2");
    }

    #[test]
    fn tolerates_missing_trailing_semicolon() {
        let stmts = segment_statements("data out; set in", "t.sans");
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[1].text, "set in");
    }

    #[test]
    fn groups_data_block_until_run() {
        let stmts = segment_statements("data out; set in; c = a + b; run;", "t.sans");
        let blocks = segment_blocks(stmts);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, RawBlockKind::Data);
        assert_eq!(blocks[0].statements.len(), 4);
    }

    #[test]
    fn proc_block_is_its_own_kind() {
        let stmts = segment_statements("proc sort data=in out=out; by a; run;", "t.sans");
        let blocks = segment_blocks(stmts);
        assert_eq!(blocks[0].kind, RawBlockKind::Proc);
    }
}
