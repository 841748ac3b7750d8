use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};

use crate::{
    error::ModelError,
    ids::{RunId, TargetId, TenantId},
};

pub const DEFAULT_PARALLELISM: usize = 4;

/// Lifecycle of a scan run. `Pending` and `Running` are the only
/// non-terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" | "canceled" => Ok(RunStatus::Cancelled),
            other => Err(ModelError::UnknownRunStatus(other.to_string())),
        }
    }
}

/// Caller-supplied knobs for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ScanOptions {
    /// Display name for the run; a timestamped default is used when absent.
    pub name: Option<String>,
    /// Batch size; also the cap on simultaneous outbound connections.
    pub parallelism: usize,
    /// Selects the quick payload variant instead of the full one.
    pub quick: bool,
    /// Free-form options carried through to the run record.
    pub extra: BTreeMap<String, String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            name: None,
            parallelism: DEFAULT_PARALLELISM,
            quick: false,
            extra: BTreeMap::new(),
        }
    }
}

impl ScanOptions {
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn quick(mut self, quick: bool) -> Self {
        self.quick = quick;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanRun {
    pub id: RunId,
    pub tenant: TenantId,
    pub name: String,
    pub target_ids: Vec<TargetId>,
    pub status: RunStatus,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub options: ScanOptions,
    pub created_by: String,
    /// Run-level failure captured by the driver task, if any.
    pub error: Option<String>,
}

impl ScanRun {
    pub fn processed(&self) -> u32 {
        self.completed.saturating_add(self.failed)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
