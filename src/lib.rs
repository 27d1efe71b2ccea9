//! Deterministic, hermetic compiler and executor for the sans tabular
//! script language.
//!
//! ```ascii
//!          sans / legacy script
//!
//!   (lex+parse) │ ▲
//!   parse_script│ │ print_expr / fmt_canonical
//!               ▼ │
//!             Script AST
//!               │
//!     (lower)    │
//!   lower_script  │
//!               ▼
//!              IRDoc  ───── validate() ───── ir::validate
//!               │
//!    (execute)  │
//!   Engine::run  │
//!               ▼
//!        tables + evidence + graph + report
//! ```
//!
//! [ast] holds the lexer, expression parser, statement front-end, and the
//! legacy-dialect translator. [ir] is the canonical, content-addressed
//! intermediate representation. [lower] turns a parsed script into IR.
//! [exec] executes IR against in-memory tables. [codec] reads/writes the
//! CSV and XPT table formats. [evidence] and [graph] build the artifact
//! bundle's analysis outputs; [bundle] assembles and self-hashes the
//! bundle; [amend] implements the IR patch engine.

#![allow(clippy::result_large_err)]

pub mod amend;
pub mod ast;
pub mod bundle;
#[cfg(all(feature = "cli", not(target_family = "wasm")))]
mod cli;
pub mod codec;
pub mod decimal;
pub mod error;
pub mod evidence;
pub mod exec;
pub mod graph;
pub mod ir;
pub mod lower;
pub mod plan;
pub mod value;

#[cfg(all(feature = "cli", not(target_family = "wasm")))]
pub use cli::Cli;
pub use error::{Diagnostic, Loc, SansResult, Severity};
