use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Unknown run status: {0}")]
    UnknownRunStatus(String),

    #[error("Unknown target status: {0}")]
    UnknownTargetStatus(String),

    #[error("Unknown target health: {0}")]
    UnknownTargetHealth(String),

    #[error("Invalid id: {0}")]
    InvalidId(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
