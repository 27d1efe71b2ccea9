//! IR step algebra (spec §3 "IR step", §4.4).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{Loc, Severity};
use crate::value::Type;

/// One IR step. `params` is always a canonical JSON object whose shape is
/// specific to `op`; kept as `serde_json::Value` (rather than per-op Rust
/// structs) because the amendment engine patches `params` by JSON pointer
/// path, and steps round-trip through `sans.ir` files verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub op: Op,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub params: Json,
    #[serde(skip)]
    pub loc: Loc,
    /// Populated at plan-emission time, not part of the stored `sans.ir`
    /// (spec §6: "execution-derived fields ... are not present in the
    /// stored sans.ir").
    #[serde(skip)]
    pub transform_id: Option<String>,
    #[serde(skip)]
    pub transform_class_id: Option<String>,
    #[serde(skip)]
    pub step_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Op {
    Datasource,
    Identity,
    Compute,
    Filter,
    Select,
    Rename,
    Sort,
    Aggregate,
    SqlSelect,
    Format,
    Transpose,
    DataStep,
    Save,
    Assert,
    LetScalar,
}

/// A compile-time refusal carried as an in-band step (spec §3, §9). When
/// `severity` is `Fatal`, the entire step list is replaced by one of these;
/// when `Warning`, it is accumulated alongside the real steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnknownBlockStep {
    pub code: String,
    pub message: String,
    pub severity: Severity,
    #[serde(skip)]
    pub loc: Option<Loc>,
}

/// Tagged union discriminating real steps from refusal sentinels, so
/// validators can match on the tag without downcasting (spec §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepOrUnknown {
    Step(Step),
    Unknown(UnknownBlockStep),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnFact {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
}

/// Static facts known about a table without executing anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableFact {
    pub columns: Option<Vec<ColumnFact>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DatasourceKind {
    Csv,
    InlineCsv,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasourceDecl {
    pub kind: DatasourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<ColumnFact>>,
}

/// The canonical intermediate representation document (spec §3 "IRDoc").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IRDoc {
    pub version: String,
    pub steps: Vec<StepOrUnknown>,
    pub tables: Vec<String>,
    pub table_facts: BTreeMap<String, TableFact>,
    pub datasources: BTreeMap<String, DatasourceDecl>,
}

impl IRDoc {
    pub fn new() -> Self {
        IRDoc {
            version: "0.1".to_string(),
            steps: Vec::new(),
            tables: Vec::new(),
            table_facts: BTreeMap::new(),
            datasources: BTreeMap::new(),
        }
    }

    /// `true` once a fatal refusal has been recorded; the step list is then
    /// exactly one `Unknown` element, per spec §3.
    pub fn is_fatal_refusal(&self) -> bool {
        matches!(
            self.steps.as_slice(),
            [StepOrUnknown::Unknown(u)] if u.severity == Severity::Fatal
        )
    }

    pub fn real_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter_map(|s| match s {
            StepOrUnknown::Step(s) => Some(s),
            StepOrUnknown::Unknown(_) => None,
        })
    }
}

impl Default for IRDoc {
    fn default() -> Self {
        Self::new()
    }
}
