//! Source locations and diagnostics.
//!
//! Every AST node and IR step carries a [Loc]. Every error carries a
//! namespaced `code` (`SANS_PARSE_*`, `SANS_VALIDATE_*`, `SANS_CAP_*`,
//! `SANS_RUNTIME_*`, `E_TYPE*`, ...) alongside a human message, so that
//! callers can match on the code rather than parse the message.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// A span of source lines within a named file.
///
/// Column information is intentionally not tracked: refusals and evidence
/// are reported at line granularity, matching the block/statement
/// granularity of the front-end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Loc {
    pub file: String,
    pub line_start: usize,
    pub line_end: usize,
}

impl Loc {
    pub fn new(file: impl Into<String>, line_start: usize, line_end: usize) -> Self {
        Loc {
            file: file.into(),
            line_start,
            line_end,
        }
    }

    pub fn single(file: impl Into<String>, line: usize) -> Self {
        Loc::new(file, line, line)
    }

    /// Smallest span covering both locations. Used when combining nodes
    /// (e.g. a binary expression spans its two operands).
    pub fn merge(&self, other: &Loc) -> Loc {
        Loc {
            file: self.file.clone(),
            line_start: self.line_start.min(other.line_start),
            line_end: self.line_end.max(other.line_end),
        }
    }
}

impl Display for Loc {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.line_start == self.line_end {
            write!(f, "{}:{}", self.file, self.line_start)
        } else {
            write!(f, "{}:{}-{}", self.file, self.line_start, self.line_end)
        }
    }
}

/// A typed diagnostic: a namespaced code, a human message, and an optional
/// location. This is the unit every refusal, warning, and runtime failure
/// is built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc: Option<Loc>,
}

impl Diagnostic {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Diagnostic {
            code,
            message: message.into(),
            loc: None,
        }
    }

    pub fn with_loc(mut self, loc: Loc) -> Self {
        self.loc = Some(loc);
        self
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.loc {
            Some(loc) => write!(f, "{}: {} ({})", self.code, self.message, loc),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for Diagnostic {}

/// Severity of an `UnknownBlockStep`-style refusal.
///
/// `Fatal` replaces the entire step list with a single sentinel step;
/// `Warning` is accumulated as a diagnostic and does not abort (unless
/// strict mode escalates it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Fatal,
}

pub type SansResult<T> = Result<T, Diagnostic>;

/// Convenience constructors for the fixed code namespace, so call sites
/// read `codes::E_BAD_EXPR` rather than repeating the string literal.
pub mod codes {
    pub const E_BAD_EXPR: &str = "E_BAD_EXPR";
    pub const E_LEGACY_EXPR: &str = "E_LEGACY_EXPR";
    pub const E_TYPE_UNKNOWN: &str = "E_TYPE_UNKNOWN";
    pub const E_CSV_COERCE: &str = "E_CSV_COERCE";
    pub const E_AMEND_VALIDATION_SCHEMA: &str = "E_AMEND_VALIDATION_SCHEMA";
    pub const E_UNDECLARED_SOURCE: &str = "E_UNDECLARED_SOURCE";

    pub const SANS_PARSE_SQL_DETECTED: &str = "SANS_PARSE_SQL_DETECTED";
    pub const SANS_PARSE_SQL_UNSUPPORTED_FORM: &str = "SANS_PARSE_SQL_UNSUPPORTED_FORM";
    pub const SANS_PARSE_UNSUPPORTED_STATEMENT: &str = "SANS_PARSE_UNSUPPORTED_STATEMENT";
    pub const SANS_PARSE_UNSUPPORTED_PROC: &str = "SANS_PARSE_UNSUPPORTED_PROC";
    pub const SANS_PARSE_FORMAT_UNSUPPORTED_STATEMENT: &str =
        "SANS_PARSE_FORMAT_UNSUPPORTED_STATEMENT";
    pub const SANS_PARSE_LOOP_BOUND_UNSUPPORTED: &str = "SANS_PARSE_LOOP_BOUND_UNSUPPORTED";
    pub const SANS_PARSE_MACRO_ERROR: &str = "SANS_PARSE_MACRO_ERROR";

    pub const SANS_VALIDATE_CYCLE: &str = "SANS_VALIDATE_CYCLE";
    pub const SANS_VALIDATE_UNDECLARED_INPUT: &str = "SANS_VALIDATE_UNDECLARED_INPUT";
    pub const SANS_VALIDATE_DUPLICATE_OUTPUT: &str = "SANS_VALIDATE_DUPLICATE_OUTPUT";
    pub const SANS_VALIDATE_DUPLICATE_SAVE_PATH: &str = "SANS_VALIDATE_DUPLICATE_SAVE_PATH";
    pub const SANS_VALIDATE_NO_SAVE: &str = "SANS_VALIDATE_NO_SAVE";
    pub const SANS_VALIDATE_UNREACHABLE: &str = "SANS_VALIDATE_UNREACHABLE";

    pub const SANS_CAP_UNSUPPORTED: &str = "SANS_CAP_UNSUPPORTED";

    pub const SANS_RUNTIME_INPUT_NOT_FOUND: &str = "SANS_RUNTIME_INPUT_NOT_FOUND";
    pub const SANS_RUNTIME_DATASOURCE_SCHEMA_MISMATCH: &str =
        "SANS_RUNTIME_DATASOURCE_SCHEMA_MISMATCH";
    pub const SANS_RUNTIME_TYPE: &str = "SANS_RUNTIME_TYPE";
    pub const SANS_RUNTIME_DIVIDE_BY_ZERO: &str = "SANS_RUNTIME_DIVIDE_BY_ZERO";
    pub const SANS_RUNTIME_UNSUPPORTED_EXPR_NODE: &str = "SANS_RUNTIME_UNSUPPORTED_EXPR_NODE";
    pub const SANS_RUNTIME_SQL_AMBIGUOUS_COLUMN: &str = "SANS_RUNTIME_SQL_AMBIGUOUS_COLUMN";
    pub const SANS_RUNTIME_FORMAT_UNDEFINED: &str = "SANS_RUNTIME_FORMAT_UNDEFINED";
    pub const SANS_RUNTIME_INFORMAT_UNSUPPORTED: &str = "SANS_RUNTIME_INFORMAT_UNSUPPORTED";
    pub const SANS_RUNTIME_ASSERT: &str = "SANS_RUNTIME_ASSERT";
    pub const SANS_RUNTIME_LOOP_LIMIT: &str = "SANS_RUNTIME_LOOP_LIMIT";
    pub const SANS_RUNTIME_CONTROL_DEPTH: &str = "SANS_RUNTIME_CONTROL_DEPTH";
    pub const SANS_RUNTIME_MISSING_COLUMN: &str = "SANS_RUNTIME_MISSING_COLUMN";
    pub const SANS_RUNTIME_DUPLICATE_RENAME_TARGET: &str = "SANS_RUNTIME_DUPLICATE_RENAME_TARGET";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loc_merge_takes_widest_span() {
        let a = Loc::new("x.sans", 3, 3);
        let b = Loc::new("x.sans", 1, 5);
        let m = a.merge(&b);
        assert_eq!(m.line_start, 1);
        assert_eq!(m.line_end, 5);
    }

    #[test]
    fn diagnostic_display_includes_loc() {
        let d = Diagnostic::new(codes::E_BAD_EXPR, "bad token").with_loc(Loc::single("a.sans", 4));
        assert_eq!(d.to_string(), "E_BAD_EXPR: bad token (a.sans:4)");
    }
}
