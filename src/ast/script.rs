//! Script front-end entry point (spec §4.3): detects strict vs legacy
//! dialect, runs the macro pre-pass in legacy mode, segments into blocks.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::ast::macros::{expand_macros, IncludeResolver};
use crate::ast::segment::{segment_blocks, segment_statements};
use crate::ast::stmt::{parse_block, Block};
use crate::error::Diagnostic;

static VERSION_HEADER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*#\s*sans\s+v[\d.]+").unwrap());

pub struct Script {
    pub blocks: Vec<Block>,
    pub legacy: bool,
    /// The macro-expanded text, present only when the macro pre-pass ran
    /// (legacy mode) and actually changed anything — this becomes the
    /// `preprocessed.sans` artifact (spec §4.9).
    pub preprocessed: Option<String>,
}

/// A resolver that never finds an include; used when the caller has no
/// filesystem context (e.g. an inline script with no `%include`s).
pub struct NoIncludes;
impl IncludeResolver for NoIncludes {
    fn resolve(&self, path: &str) -> Result<String, Diagnostic> {
        Err(Diagnostic::new(
            crate::error::codes::SANS_PARSE_MACRO_ERROR,
            format!("%include not supported in this context: '{path}'"),
        ))
    }
}

/// `force_legacy` lets the CLI's `--legacy-sas` flag require legacy parsing
/// even without the detection heuristic (spec §6 `check`/`run --legacy-sas`).
pub fn parse_script(
    source: &str,
    file: &str,
    force_legacy: bool,
    resolver: &dyn IncludeResolver,
) -> Result<Script, Diagnostic> {
    let legacy = force_legacy || !VERSION_HEADER_RE.is_match(source);

    let (text, preprocessed) = if legacy {
        let expanded = expand_macros(source, file, resolver)?;
        let changed = expanded != source;
        (expanded.clone(), if changed { Some(expanded) } else { None })
    } else {
        (source.to_string(), None)
    };

    let statements = segment_statements(&text, file);
    let raw_blocks = segment_blocks(statements);
    let blocks = raw_blocks
        .into_iter()
        .map(|b| parse_block(b, legacy))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Script { blocks, legacy, preprocessed })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_dialect_detected_by_default() {
        let s = parse_script("data out; set in; run;", "t.sans", false, &NoIncludes).unwrap();
        assert!(s.legacy);
    }

    #[test]
    fn strict_header_selects_strict_mode() {
        let s = parse_script(
            "# sans v0.1\ndata out; set in; c = a + b; run;",
            "t.sans",
            false,
            &NoIncludes,
        )
        .unwrap();
        assert!(!s.legacy);
    }

    #[test]
    fn macro_expansion_produces_preprocessed_artifact() {
        let s = parse_script(
            "%let CONST = 100;\ndata out; set in; z = x + &CONST.; run;",
            "t.sans",
            false,
            &NoIncludes,
        )
        .unwrap();
        assert!(s.preprocessed.as_deref().unwrap().contains("z = x + 100;"));
    }
}
