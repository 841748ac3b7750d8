//! Core data model definitions shared across fleetscan crates.
#![allow(missing_docs)]

pub mod error;
pub mod ids;
pub mod result;
pub mod run;
pub mod severity;
pub mod target;

pub use error::{ModelError, Result as ModelResult};
pub use ids::{RunId, TargetId, TargetResultId, TenantId};
pub use result::{TargetResult, TargetStatus};
pub use run::{RunStatus, ScanOptions, ScanRun};
pub use severity::{Severity, SeverityCounts};
pub use target::{ResolvedTarget, Target, TargetHealth};
