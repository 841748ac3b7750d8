use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};

use crate::{
    error::ModelError,
    ids::{RunId, TargetId, TargetResultId, TenantId},
    severity::SeverityCounts,
};

/// Per-target state. Transitions only move forward:
/// `Pending -> Running -> {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TargetStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TargetStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            TargetStatus::Pending => 0,
            TargetStatus::Running => 1,
            TargetStatus::Completed | TargetStatus::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the monotonic order.
    pub fn can_transition_to(self, next: TargetStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Pending => "pending",
            TargetStatus::Running => "running",
            TargetStatus::Completed => "completed",
            TargetStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TargetStatus::Pending),
            "running" => Ok(TargetStatus::Running),
            "completed" => Ok(TargetStatus::Completed),
            "failed" => Ok(TargetStatus::Failed),
            other => Err(ModelError::UnknownTargetStatus(other.to_string())),
        }
    }
}

/// Outcome of scanning one target within one run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetResult {
    pub id: TargetResultId,
    pub run_id: RunId,
    pub target_id: TargetId,
    pub tenant: TenantId,
    pub status: TargetStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub severity: SeverityCounts,
    /// Raw payload output as captured from the target.
    pub raw_output: Option<String>,
    pub error: Option<String>,
}

impl TargetResult {
    pub fn pending(run_id: RunId, target_id: TargetId, tenant: TenantId) -> Self {
        Self {
            id: TargetResultId::new(),
            run_id,
            target_id,
            tenant,
            status: TargetStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            severity: SeverityCounts::default(),
            raw_output: None,
            error: None,
        }
    }

    pub fn total_vulnerabilities(&self) -> u64 {
        self.severity.total()
    }
}
