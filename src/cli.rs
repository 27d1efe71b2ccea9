//! Command-line entry points (spec §6). Every subcommand funnels through the
//! same core library calls ([crate::plan::build_plan], [crate::exec::Engine],
//! [crate::bundle], [crate::amend::apply_amendment]) that a library embedder
//! would use directly; the CLI's only job is argument parsing, filesystem
//! plumbing, and mapping a [Diagnostic] to one of the uniform exit-code
//! buckets (spec §6: `0` ok, `10` warnings-only, `30` parse refusal, `31`
//! validation refusal, `50` runtime failure, `1` amendment refusal).

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde_json::{json, Value as Json};

use crate::amend::apply_amendment;
use crate::ast::fmt::fmt_canonical;
use crate::ast::macros::IncludeResolver;
use crate::ast::script::{parse_script, NoIncludes};
use crate::bundle::{self, build_bundle, BundleFile};
use crate::error::Diagnostic;
use crate::exec::{Engine, FsReader, DEFAULT_ENGINE_CONFIG};
use crate::graph::{build_graph, build_vars_graph};
use crate::ir::step::IRDoc;
use crate::ir::validate::validate;
use crate::plan::{build_plan, PlanResult, TableBinding};

mod exit {
    pub const OK: i32 = 0;
    pub const WARNINGS_ONLY: i32 = 10;
    pub const PARSE_REFUSAL: i32 = 30;
    pub const VALIDATION_REFUSAL: i32 = 31;
    pub const RUNTIME_FAILURE: i32 = 50;
    pub const AMENDMENT_REFUSAL: i32 = 1;
}

fn bucket_for(code: &str) -> i32 {
    if code.starts_with("SANS_PARSE") || code.starts_with("SANS_CAP") || code.starts_with("E_LEGACY_EXPR") {
        exit::PARSE_REFUSAL
    } else if code.starts_with("SANS_VALIDATE") {
        exit::VALIDATION_REFUSAL
    } else if code.starts_with("E_AMEND") {
        exit::AMENDMENT_REFUSAL
    } else {
        exit::RUNTIME_FAILURE
    }
}

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"), about, version)]
pub enum Cli {
    /// Parses, lowers, and validates a script without executing it.
    Check(CheckArgs),
    /// Parses, lowers, validates, executes, and writes a self-hashed bundle.
    Run(RunArgs),
    /// Executes an already-lowered `sans.ir` file.
    RunIr(RunIrArgs),
    /// Lowers a script to `sans.ir` without executing it.
    EmitIr(EmitIrArgs),
    /// Structurally validates a stored `sans.ir` file.
    IrValidate(IrValidateArgs),
    /// Applies a JSON amendment batch to a stored `sans.ir` file.
    IrAmend(IrAmendArgs),
    /// Prints the canonical (or identity-checked) form of a script.
    Fmt(FmtArgs),
    /// Re-verifies a previously written bundle's self-hash.
    Verify(VerifyArgs),
}

#[derive(clap::Args)]
pub struct CheckArgs {
    script: PathBuf,
    #[arg(long = "out")]
    out: PathBuf,
    #[arg(long = "tables", value_delimiter = ',')]
    tables: Vec<String>,
    #[arg(long = "legacy-sas")]
    legacy_sas: bool,
    #[arg(long = "no-strict")]
    no_strict: bool,
}

#[derive(clap::Args)]
pub struct RunArgs {
    script: PathBuf,
    #[arg(long = "out")]
    out: PathBuf,
    #[arg(long = "tables", value_delimiter = ',')]
    tables: Vec<String>,
    #[arg(long = "format", default_value = "csv")]
    format: String,
    #[arg(long = "legacy-sas")]
    legacy_sas: bool,
}

#[derive(clap::Args)]
pub struct RunIrArgs {
    ir_file: PathBuf,
    #[arg(long = "out")]
    out: PathBuf,
}

#[derive(clap::Args)]
pub struct EmitIrArgs {
    script: PathBuf,
    #[arg(long = "out")]
    out: PathBuf,
    #[arg(long = "cwd")]
    cwd: Option<PathBuf>,
    #[arg(long = "schema-lock")]
    schema_lock: Option<PathBuf>,
    #[arg(long = "json")]
    json: bool,
}

#[derive(clap::Args)]
pub struct IrValidateArgs {
    file: PathBuf,
    #[arg(long = "strict")]
    strict: bool,
}

#[derive(clap::Args)]
pub struct IrAmendArgs {
    #[arg(long = "ir")]
    ir: PathBuf,
    #[arg(long = "req")]
    req: PathBuf,
    #[arg(long = "out")]
    out: PathBuf,
}

#[derive(clap::Args)]
pub struct FmtArgs {
    file: PathBuf,
    #[arg(long = "check")]
    check: bool,
    #[arg(long = "style", default_value = "v0")]
    style: String,
}

#[derive(clap::Args)]
pub struct VerifyArgs {
    report_or_dir: PathBuf,
}

/// Resolves `%include "path"` relative to a fixed base directory.
struct FsIncludeResolver {
    base: PathBuf,
}

impl IncludeResolver for FsIncludeResolver {
    fn resolve(&self, path: &str) -> Result<String, Diagnostic> {
        let full = self.base.join(path.replace('\\', "/"));
        fs::read_to_string(&full).map_err(|e| {
            Diagnostic::new(
                crate::error::codes::SANS_PARSE_MACRO_ERROR,
                format!("could not read included file '{}': {e}", full.display()),
            )
        })
    }
}

/// Parses `NAME=PATH[,NAME=PATH...]` into ordered `(name, TableBinding)`
/// pairs, reading each CSV's bytes eagerly. A duplicate name is a hard
/// error — the caller (`run`) maps it to exit 50, per spec §6.
fn read_table_bindings(cwd: &Path, tables: &[String]) -> Result<Vec<(String, TableBinding)>, Diagnostic> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for entry in tables {
        let (name, rel_path) = entry.split_once('=').ok_or_else(|| {
            Diagnostic::new(
                crate::error::codes::SANS_RUNTIME_INPUT_NOT_FOUND,
                format!("--tables entry '{entry}' is not in NAME=PATH form"),
            )
        })?;
        if !seen.insert(name.to_string()) {
            return Err(Diagnostic::new(
                crate::error::codes::SANS_RUNTIME_INPUT_NOT_FOUND,
                format!("duplicate table binding for '{name}'"),
            ));
        }
        let full = cwd.join(rel_path);
        let content = fs::read_to_string(&full).map_err(|e| {
            Diagnostic::new(
                crate::error::codes::SANS_RUNTIME_INPUT_NOT_FOUND,
                format!("could not read '{}': {e}", full.display()),
            )
        })?;
        out.push((name.to_string(), TableBinding::Csv { path: rel_path.to_string(), content }));
    }
    Ok(out)
}

fn write_bundle_files(out_dir: &Path, files: &[BundleFile]) -> std::io::Result<()> {
    for file in files {
        let dest = out_dir.join(&file.path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, &file.bytes)?;
    }
    Ok(())
}

/// A partial bundle for `check` / `emit-ir`: the plan/script files plus a
/// report that hashes exactly those files (no execution has happened, so
/// there are no outputs or evidence artifacts to include).
fn build_plan_only_report(files: &[BundleFile]) -> Json {
    bundle::build_report(files)
}

impl Cli {
    pub fn run(&self) -> i32 {
        match self {
            Cli::Check(args) => run_check(args),
            Cli::Run(args) => run_run(args),
            Cli::RunIr(args) => run_run_ir(args),
            Cli::EmitIr(args) => run_emit_ir(args),
            Cli::IrValidate(args) => run_ir_validate(args),
            Cli::IrAmend(args) => run_ir_amend(args),
            Cli::Fmt(args) => run_fmt(args),
            Cli::Verify(args) => run_verify(args),
        }
    }
}

fn print_diagnostic_and_bucket(d: &Diagnostic) -> i32 {
    log::warn!("{d}");
    eprintln!("{d}");
    bucket_for(d.code)
}

fn run_check(args: &CheckArgs) -> i32 {
    let cwd = args.script.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let source = match fs::read_to_string(&args.script) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("could not read '{}': {e}", args.script.display());
            return exit::RUNTIME_FAILURE;
        }
    };
    let bindings = match read_table_bindings(&cwd, &args.tables) {
        Ok(b) => b,
        Err(d) => return print_diagnostic_and_bucket(&d),
    };
    let resolver = FsIncludeResolver { base: cwd };
    let file_name = args.script.file_name().and_then(|s| s.to_str()).unwrap_or("script.sans").to_string();
    let plan = match build_plan(&source, &file_name, args.legacy_sas, &bindings, &resolver) {
        Ok(p) => p,
        Err(d) => return print_diagnostic_and_bucket(&d),
    };

    if plan.doc.is_fatal_refusal() {
        let _ = emit_check_bundle(args, &plan);
        return exit::PARSE_REFUSAL;
    }

    match emit_check_bundle(args, &plan) {
        Ok(()) => exit::OK,
        Err(d) => print_diagnostic_and_bucket(&d),
    }
}

fn emit_check_bundle(args: &CheckArgs, plan: &PlanResult) -> Result<(), Diagnostic> {
    let ir_bytes = serde_json::to_vec_pretty(&plan.doc)
        .map_err(|e| Diagnostic::new(crate::error::codes::E_TYPE_UNKNOWN, format!("IR is not serializable: {e}")))?;
    let mut files = vec![BundleFile { path: bundle::PLAN_FILE.to_string(), bytes: ir_bytes }];
    files.push(BundleFile { path: bundle::EXPANDED_FILE.to_string(), bytes: plan.expanded.as_bytes().to_vec() });
    if let Some(p) = &plan.preprocessed {
        files.push(BundleFile { path: bundle::PREPROCESSED_FILE.to_string(), bytes: p.as_bytes().to_vec() });
    }
    let report = build_plan_only_report(&files);
    files.push(BundleFile { path: bundle::REPORT_FILE.to_string(), bytes: serde_json::to_vec_pretty(&report).unwrap() });

    write_bundle_files(&args.out, &files)
        .map_err(|e| Diagnostic::new(crate::error::codes::SANS_RUNTIME_INPUT_NOT_FOUND, format!("could not write bundle: {e}")))
}

fn run_run(args: &RunArgs) -> i32 {
    let cwd = args.script.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let source = match fs::read_to_string(&args.script) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("could not read '{}': {e}", args.script.display());
            return exit::RUNTIME_FAILURE;
        }
    };
    let bindings = match read_table_bindings(&cwd, &args.tables) {
        Ok(b) => b,
        Err(d) => return print_diagnostic_and_bucket(&d),
    };
    let resolver = FsIncludeResolver { base: cwd.clone() };
    let file_name = args.script.file_name().and_then(|s| s.to_str()).unwrap_or("script.sans").to_string();
    let plan = match build_plan(&source, &file_name, args.legacy_sas, &bindings, &resolver) {
        Ok(p) => p,
        Err(d) => return print_diagnostic_and_bucket(&d),
    };
    if plan.doc.is_fatal_refusal() {
        eprintln!("script was refused during parsing");
        return exit::PARSE_REFUSAL;
    }

    let mut doc = plan.doc;
    apply_default_save_format(&mut doc, &args.format);

    let reader = FsReader { base_dir: cwd };
    let engine = Engine::new(&reader, DEFAULT_ENGINE_CONFIG);
    let exec = match engine.run(&doc) {
        Ok(e) => e,
        Err(d) => return print_diagnostic_and_bucket(&d),
    };

    let graph = build_graph(&doc);
    let vars_graph = build_vars_graph(&doc);
    let files = match build_bundle(&doc, &plan.expanded, plan.preprocessed.as_deref(), &exec, &graph, &vars_graph) {
        Ok(f) => f,
        Err(d) => return print_diagnostic_and_bucket(&d),
    };

    if let Err(e) = write_bundle_files(&args.out, &files) {
        eprintln!("could not write bundle: {e}");
        return exit::RUNTIME_FAILURE;
    }
    exit::OK
}

fn apply_default_save_format(doc: &mut IRDoc, format: &str) {
    use crate::ir::step::{Op, StepOrUnknown};
    for step in doc.steps.iter_mut() {
        if let StepOrUnknown::Step(s) = step {
            if s.op == Op::Save && s.params.get("format").is_none() {
                s.params["format"] = json!(format);
            }
        }
    }
}

fn run_run_ir(args: &RunIrArgs) -> i32 {
    let bytes = match fs::read(&args.ir_file) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("could not read '{}': {e}", args.ir_file.display());
            return exit::RUNTIME_FAILURE;
        }
    };
    let mut doc: IRDoc = match serde_json::from_slice(&bytes) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("'{}' is not a valid sans.ir file: {e}", args.ir_file.display());
            return exit::VALIDATION_REFUSAL;
        }
    };
    for step in doc.steps.iter_mut() {
        if let crate::ir::step::StepOrUnknown::Step(s) = step {
            crate::ir::ids::stamp_identities(s);
        }
    }
    if !doc.is_fatal_refusal() {
        if let Err(d) = validate(&doc) {
            return print_diagnostic_and_bucket(&d);
        }
    }

    let cwd = args.ir_file.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let reader = FsReader { base_dir: cwd };
    let engine = Engine::new(&reader, DEFAULT_ENGINE_CONFIG);
    let exec = match engine.run(&doc) {
        Ok(e) => e,
        Err(d) => return print_diagnostic_and_bucket(&d),
    };

    let graph = build_graph(&doc);
    let vars_graph = build_vars_graph(&doc);
    let files = match build_bundle(&doc, "", None, &exec, &graph, &vars_graph) {
        Ok(f) => f,
        Err(d) => return print_diagnostic_and_bucket(&d),
    };
    if let Err(e) = write_bundle_files(&args.out, &files) {
        eprintln!("could not write bundle: {e}");
        return exit::RUNTIME_FAILURE;
    }
    exit::OK
}

fn run_emit_ir(args: &EmitIrArgs) -> i32 {
    let cwd = args.cwd.clone().unwrap_or_else(|| args.script.parent().unwrap_or_else(|| Path::new(".")).to_path_buf());
    let source = match fs::read_to_string(&args.script) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("could not read '{}': {e}", args.script.display());
            return exit::RUNTIME_FAILURE;
        }
    };
    let resolver = FsIncludeResolver { base: cwd };
    let file_name = args.script.file_name().and_then(|s| s.to_str()).unwrap_or("script.sans").to_string();
    let plan = match build_plan(&source, &file_name, false, &[], &resolver) {
        Ok(p) => p,
        Err(d) => return print_diagnostic_and_bucket(&d),
    };
    let bytes = if args.json {
        serde_json::to_vec_pretty(&plan.doc).unwrap()
    } else {
        serde_json::to_vec(&plan.doc).unwrap()
    };
    if let Some(parent) = args.out.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if let Err(e) = fs::write(&args.out, bytes) {
        eprintln!("could not write '{}': {e}", args.out.display());
        return exit::RUNTIME_FAILURE;
    }
    if plan.doc.is_fatal_refusal() {
        exit::PARSE_REFUSAL
    } else {
        exit::OK
    }
}

fn run_ir_validate(args: &IrValidateArgs) -> i32 {
    let bytes = match fs::read(&args.file) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("could not read '{}': {e}", args.file.display());
            return exit::RUNTIME_FAILURE;
        }
    };
    let doc: IRDoc = match serde_json::from_slice(&bytes) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("'{}' is not a valid sans.ir file: {e}", args.file.display());
            return exit::VALIDATION_REFUSAL;
        }
    };
    if doc.is_fatal_refusal() {
        return exit::PARSE_REFUSAL;
    }
    match validate(&doc) {
        Ok(()) => exit::OK,
        Err(d) => {
            let bucket = print_diagnostic_and_bucket(&d);
            if args.strict { bucket } else { exit::WARNINGS_ONLY }
        }
    }
}

fn run_ir_amend(args: &IrAmendArgs) -> i32 {
    let ir_bytes = match fs::read(&args.ir) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("could not read '{}': {e}", args.ir.display());
            return exit::RUNTIME_FAILURE;
        }
    };
    let doc: IRDoc = match serde_json::from_slice(&ir_bytes) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("'{}' is not a valid sans.ir file: {e}", args.ir.display());
            return exit::VALIDATION_REFUSAL;
        }
    };
    let req_bytes = match fs::read(&args.req) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("could not read '{}': {e}", args.req.display());
            return exit::RUNTIME_FAILURE;
        }
    };
    let request: Json = match serde_json::from_slice(&req_bytes) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("'{}' is not valid JSON: {e}", args.req.display());
            return exit::AMENDMENT_REFUSAL;
        }
    };

    let response = apply_amendment(&doc, &request);
    if let Some(parent) = args.out.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let _ = fs::write(&args.out, serde_json::to_vec_pretty(&response).unwrap());

    if response["status"] == "refused" {
        exit::AMENDMENT_REFUSAL
    } else {
        exit::OK
    }
}

fn run_fmt(args: &FmtArgs) -> i32 {
    let source = match fs::read_to_string(&args.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("could not read '{}': {e}", args.file.display());
            return exit::RUNTIME_FAILURE;
        }
    };
    let file_name = args.file.file_name().and_then(|s| s.to_str()).unwrap_or("script.sans").to_string();
    let script = match parse_script(&source, &file_name, false, &NoIncludes) {
        Ok(s) => s,
        Err(d) => return print_diagnostic_and_bucket(&d),
    };
    let formatted = fmt_canonical(&script);

    if args.check {
        if formatted == source {
            exit::OK
        } else {
            println!("{formatted}");
            exit::WARNINGS_ONLY
        }
    } else {
        print!("{formatted}");
        exit::OK
    }
}

fn run_verify(args: &VerifyArgs) -> i32 {
    let dir = &args.report_or_dir;
    let report_path = if dir.is_dir() { dir.join(bundle::REPORT_FILE) } else { dir.clone() };
    let base = report_path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();

    let report_bytes = match fs::read(&report_path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("could not read '{}': {e}", report_path.display());
            return exit::RUNTIME_FAILURE;
        }
    };
    let report: Json = match serde_json::from_slice(&report_bytes) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("'{}' is not valid JSON: {e}", report_path.display());
            return exit::RUNTIME_FAILURE;
        }
    };
    let recorded_files = match report["files"].as_object() {
        Some(m) => m,
        None => {
            eprintln!("'{}' has no files map", report_path.display());
            return exit::RUNTIME_FAILURE;
        }
    };

    let mut files = Vec::new();
    for path in recorded_files.keys() {
        let full = base.join(path);
        match fs::read(&full) {
            Ok(bytes) => files.push(BundleFile { path: path.clone(), bytes }),
            Err(e) => {
                eprintln!("could not read bundle file '{}': {e}", full.display());
                return exit::RUNTIME_FAILURE;
            }
        }
    }
    files.push(BundleFile { path: bundle::REPORT_FILE.to_string(), bytes: report_bytes });

    match bundle::verify(&files) {
        Ok(()) => exit::OK,
        Err(d) => print_diagnostic_and_bucket(&d),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_for_maps_namespaces() {
        assert_eq!(bucket_for("SANS_PARSE_SQL_DETECTED"), exit::PARSE_REFUSAL);
        assert_eq!(bucket_for("SANS_VALIDATE_CYCLE"), exit::VALIDATION_REFUSAL);
        assert_eq!(bucket_for("SANS_RUNTIME_TYPE"), exit::RUNTIME_FAILURE);
        assert_eq!(bucket_for("E_AMEND_VALIDATION_SCHEMA"), exit::AMENDMENT_REFUSAL);
        assert_eq!(bucket_for("E_CSV_COERCE"), exit::RUNTIME_FAILURE);
    }

    #[test]
    fn duplicate_table_binding_is_rejected() {
        let err = read_table_bindings(Path::new("."), &["a=x.csv".to_string(), "a=y.csv".to_string()]).unwrap_err();
        assert_eq!(err.code, crate::error::codes::SANS_RUNTIME_INPUT_NOT_FOUND);
    }
}
