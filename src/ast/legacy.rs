//! Legacy (SAS-like) predicate dialect translator (spec §4.2).
//!
//! Ported from the original `legacy/expr.py`: word operators and the
//! `^=`/`~=`/bare-`=` substitutions only apply outside string literals, so
//! translation first splits the text into string/non-string segments, then
//! rewrites each non-string segment, then re-scans the *translated* text to
//! make sure no legacy token survived (a legacy token inside what looks like
//! a string boundary mismatch would otherwise slip through).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::ast::parser::parse_expr;
use crate::error::{codes, Diagnostic};

static WORD_OP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(eq|ne|lt|le|gt|ge)\b").unwrap());

fn word_op_symbol(word: &str) -> &'static str {
    match word.to_ascii_lowercase().as_str() {
        "eq" => "==",
        "ne" => "!=",
        "lt" => "<",
        "le" => "<=",
        "gt" => ">",
        "ge" => ">=",
        other => unreachable!("unexpected legacy word op {other}"),
    }
}

/// One lexical segment of legacy source text: either inside a quoted string
/// (left untouched by translation) or outside one (rewritten).
struct Segment {
    text: String,
    is_string: bool,
}

fn split_string_segments(text: &str) -> Result<Vec<Segment>, Diagnostic> {
    let mut segments = Vec::new();
    let mut buf = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut escape = false;

    let flush = |buf: &mut String, is_string: bool, segments: &mut Vec<Segment>| {
        if !buf.is_empty() {
            segments.push(Segment { text: std::mem::take(buf), is_string });
        }
    };

    for ch in text.chars() {
        if in_single {
            buf.push(ch);
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '\'' {
                in_single = false;
                flush(&mut buf, true, &mut segments);
            }
            continue;
        }
        if in_double {
            buf.push(ch);
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_double = false;
                flush(&mut buf, true, &mut segments);
            }
            continue;
        }
        match ch {
            '\'' => {
                flush(&mut buf, false, &mut segments);
                in_single = true;
                buf.push(ch);
            }
            '"' => {
                flush(&mut buf, false, &mut segments);
                in_double = true;
                buf.push(ch);
            }
            _ => buf.push(ch),
        }
    }

    if in_single || in_double {
        return Err(Diagnostic::new(
            codes::E_LEGACY_EXPR,
            "unterminated string literal in legacy expression",
        ));
    }
    flush(&mut buf, false, &mut segments);
    Ok(segments)
}

/// Scans for bare `=` not part of `<=`, `>=`, `==`, `!=`, `^=`, `~=`, and not
/// followed by another `=`. Rust's `regex` crate has no lookaround, so this
/// is done with an explicit char scan rather than the Python lookbehind.
fn bare_eq_positions(text: &str) -> Vec<usize> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    for (i, &c) in chars.iter().enumerate() {
        if c != '=' {
            continue;
        }
        let prev = if i > 0 { Some(chars[i - 1]) } else { None };
        let next = chars.get(i + 1).copied();
        if matches!(prev, Some('<') | Some('>') | Some('=') | Some('!') | Some('^') | Some('~')) {
            continue;
        }
        if next == Some('=') {
            continue;
        }
        out.push(i);
    }
    out
}

fn replace_bare_eq(text: &str) -> String {
    let positions = bare_eq_positions(text);
    if positions.is_empty() {
        return text.to_string();
    }
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + positions.len());
    for (i, c) in chars.iter().enumerate() {
        if positions.contains(&i) {
            out.push_str("==");
        } else {
            out.push(*c);
        }
    }
    out
}

/// Collects every legacy token present in non-string segments of `text`,
/// for the post-translation re-scan.
fn find_legacy_tokens(text: &str) -> Result<Vec<String>, Diagnostic> {
    let mut tokens = Vec::new();
    for seg in split_string_segments(text)? {
        if seg.is_string {
            continue;
        }
        for m in WORD_OP_RE.find_iter(&seg.text) {
            tokens.push(m.as_str().to_ascii_lowercase());
        }
        let mut rest = seg.text.as_str();
        while let Some(idx) = rest.find("^=").or_else(|| rest.find("~=")) {
            tokens.push(rest[idx..idx + 2].to_string());
            rest = &rest[idx + 2..];
        }
        if !bare_eq_positions(&seg.text).is_empty() {
            tokens.push("=".to_string());
        }
        if seg.text.contains("<>") {
            tokens.push("<>".to_string());
        }
    }
    Ok(tokens)
}

fn translate_segment(text: &str) -> Result<String, Diagnostic> {
    if text.contains("<>") {
        return Err(Diagnostic::new(
            codes::E_LEGACY_EXPR,
            "unsupported legacy operator '<>' in expression",
        ));
    }
    let translated = WORD_OP_RE.replace_all(text, |caps: &regex::Captures| {
        word_op_symbol(&caps[1]).to_string()
    });
    let translated = translated.replace("^=", "!=").replace("~=", "!=");
    Ok(replace_bare_eq(&translated))
}

/// Translates legacy predicate text into the strict expression dialect,
/// without parsing it. Used when the caller wants to validate separately.
pub fn translate_legacy_predicate(text: &str) -> Result<String, Diagnostic> {
    let segments = split_string_segments(text)?;
    let mut out = String::new();
    for seg in segments {
        if seg.is_string {
            out.push_str(&seg.text);
        } else {
            out.push_str(&translate_segment(&seg.text)?);
        }
    }

    let remaining = find_legacy_tokens(&out)?;
    if !remaining.is_empty() {
        let mut uniq: Vec<String> = remaining;
        uniq.sort();
        uniq.dedup();
        return Err(Diagnostic::new(
            codes::E_LEGACY_EXPR,
            format!("unsupported legacy tokens in expression: {}", uniq.join(", ")),
        ));
    }
    Ok(out)
}

/// Translates and parses a legacy predicate in one step.
pub fn parse_legacy_predicate(
    text: &str,
    file: &str,
    line: usize,
) -> Result<crate::ast::expr::Expr, Diagnostic> {
    let translated = translate_legacy_predicate(text)?;
    parse_expr(&translated, file, line).map_err(|d| {
        let loc = d.loc.clone().unwrap_or_else(|| crate::error::Loc::single(file, line));
        Diagnostic::new(
            codes::E_LEGACY_EXPR,
            format!("malformed legacy expression: {}", d.message),
        )
        .with_loc(loc)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_ops_translate_outside_strings() {
        assert_eq!(translate_legacy_predicate("a eq 1 and b ne 2").unwrap(), "a == 1 and b != 2");
    }

    #[test]
    fn word_ops_inside_strings_are_untouched() {
        assert_eq!(
            translate_legacy_predicate("a == 'eq ne lt'").unwrap(),
            "a == 'eq ne lt'"
        );
    }

    #[test]
    fn caret_and_tilde_equals_become_ne() {
        assert_eq!(translate_legacy_predicate("a ^= 1").unwrap(), "a != 1");
        assert_eq!(translate_legacy_predicate("a ~= 1").unwrap(), "a != 1");
    }

    #[test]
    fn bare_equals_becomes_eq_eq() {
        assert_eq!(translate_legacy_predicate("a = 1").unwrap(), "a == 1");
    }

    #[test]
    fn double_equals_is_untouched() {
        assert_eq!(translate_legacy_predicate("a == 1").unwrap(), "a == 1");
    }

    #[test]
    fn angle_bracket_form_is_refused() {
        let err = translate_legacy_predicate("a <> 1").unwrap_err();
        assert_eq!(err.code, codes::E_LEGACY_EXPR);
    }

    #[test]
    fn unterminated_string_is_refused() {
        let err = translate_legacy_predicate("a == 'unterminated").unwrap_err();
        assert_eq!(err.code, codes::E_LEGACY_EXPR);
    }

    #[test]
    fn parse_legacy_predicate_builds_strict_ast() {
        let e = parse_legacy_predicate("a eq 1 and b gt 2", "t.sans", 1).unwrap();
        assert!(matches!(e.kind, crate::ast::expr::ExprKind::BoolOp { .. }));
    }
}
