//! Canonical intermediate representation (spec §3, §4.4, §4.5).

pub mod canon;
pub mod ids;
pub mod step;
pub mod validate;

pub use step::{
    ColumnFact, DatasourceDecl, DatasourceKind, IRDoc, Op, Step, StepOrUnknown, TableFact,
    UnknownBlockStep,
};
