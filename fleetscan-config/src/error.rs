use std::path::PathBuf;

use fleetscan_core::ScanError;
use fleetscan_model::TargetId;
use thiserror::Error;

/// Guard-rail violations found in an otherwise parseable configuration or
/// inventory.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("orchestrator settings are invalid: {0}")]
    Orchestrator(#[from] ScanError),

    #[error("payload script {} does not exist", .0.display())]
    MissingPayload(PathBuf),

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("database url must use the postgres:// or postgresql:// scheme")]
    UnsupportedDatabaseUrl,

    #[error("inventory lists target {id} more than once")]
    DuplicateTarget { id: TargetId },

    #[error("inventory target '{name}' has no tenant and the file sets no default tenant")]
    MissingTenant { name: String },

    #[error("inventory target '{name}' is invalid: {reason}")]
    InvalidTarget { name: String, reason: String },
}
