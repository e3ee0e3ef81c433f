//! # Diagnostic Label Module
//!
//! Derives one diagnostic label per patient from the longitudinal clinical
//! tables. The diagnostic summary is normalized to unified change codes,
//! joined with arm assignments and the registry, and each patient's baseline
//! visit decides the baseline class. The whole join is computed once into an
//! immutable [`DxContext`] that every consumer borrows.

use crate::tables::Rid;
use thiserror::Error;

pub mod baseline;
pub mod codes;
pub mod context;
pub mod visits;

pub use baseline::{BaselineClass, DiagnosticLabel, DxClass, MciCourse, classify_baseline};
pub use codes::{ChangeCode, ChangeSource, NormalizedVisit, normalize_change, normalize_visits};
pub use context::{
    BaselineLabels, DxAnnotation, DxContext, DxVisit, PatientSummary, TimedDxAnnotation,
    get_baseline_classes, get_dx, get_dx_with_time,
};
pub use visits::{PatientCoverage, VisitCoverage, visit_coverage};

/// Secondary visit code that marks a patient's baseline visit.
pub const BASELINE_VISIT: &str = "bl";

/// Errors raised while joining the clinical tables.
#[derive(Error, Debug)]
pub enum LabelError {
    #[error(
        "Table '{table}' has more than one row for {key}, but a one-to-one join was expected."
    )]
    DuplicateKey { table: &'static str, key: String },
    #[error(
        "Patient RID={rid} has conflicting baseline classes across baseline visits ({first} vs {second})."
    )]
    ConflictingBaseline {
        rid: Rid,
        first: BaselineClass,
        second: BaselineClass,
    },
}
