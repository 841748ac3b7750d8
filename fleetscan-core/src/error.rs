use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanError {
    /// Stable snake_case label for callers that report errors by kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::Validation(_) => "validation_error",
            ScanError::NotFound(_) => "not_found",
            ScanError::InvalidState(_) => "invalid_state",
            ScanError::Connectivity(_) => "connectivity_error",
            ScanError::Persistence(_) => "persistence_error",
            ScanError::Io(_) => "io_error",
            ScanError::Serialization(_) => "serialization_error",
            ScanError::Internal(_) => "internal_error",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ScanError::NotFound(_))
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for ScanError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => {
                ScanError::NotFound("row not found".to_string())
            }
            other => ScanError::Persistence(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
