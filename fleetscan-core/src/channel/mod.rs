//! Connectivity channel: the per-target remote execution and transfer
//! surface the orchestrator drives.
//!
//! Every operation is independent and stateless per call. Failures never
//! surface as `Err`; they come back as `success == false` plus a
//! [`FailureKind`] and a human-readable message, so callers only ever branch
//! on success.

use std::{fmt, path::Path, time::Duration};

use async_trait::async_trait;
use fleetscan_model::ResolvedTarget;
use serde::{Deserialize, Serialize};

pub mod host_info;
pub mod ssh;

pub use host_info::HostInfo;
pub use ssh::{SshChannel, SshChannelConfig};

/// Why a channel operation did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The operation exceeded its deadline and was killed.
    Timeout,
    /// The remote side refused the connection or rejected the credentials.
    Refused,
    /// The channel itself could not be established (spawn failure, IO error).
    ChannelError,
    /// The command ran but exited non-zero.
    NonZeroExit,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Refused => "refused",
            FailureKind::ChannelError => "channel_error",
            FailureKind::NonZeroExit => "non_zero_exit",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a minimal connect-and-return handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProbe {
    pub success: bool,
    pub duration: Duration,
    pub failure: Option<FailureKind>,
    pub error: Option<String>,
}

impl ConnectionProbe {
    pub fn ok(duration: Duration) -> Self {
        Self {
            success: true,
            duration,
            failure: None,
            error: None,
        }
    }

    pub fn failed(
        duration: Duration,
        failure: FailureKind,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            duration,
            failure: Some(failure),
            error: Some(error.into()),
        }
    }
}

/// Captured outcome of one remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub failure: Option<FailureKind>,
}

impl ExecOutput {
    pub fn failed(
        duration: Duration,
        failure: FailureKind,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: stderr.into(),
            duration,
            failure: Some(failure),
        }
    }

    /// One-line description of why the command failed.
    pub fn error_message(&self) -> String {
        let detail = self.stderr.trim();
        match (self.failure, self.exit_code) {
            (Some(FailureKind::NonZeroExit), Some(code)) if detail.is_empty() => {
                format!("command exited with status {code}")
            }
            (Some(FailureKind::NonZeroExit), Some(code)) => {
                format!("command exited with status {code}: {detail}")
            }
            (Some(kind), _) if detail.is_empty() => kind.to_string(),
            (Some(kind), _) => format!("{kind}: {detail}"),
            (None, _) => detail.to_string(),
        }
    }
}

/// Result of a bulk file transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl TransferOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Remote connectivity abstraction. Implementations must enforce every
/// timeout by terminating the underlying operation, not just by no longer
/// awaiting it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    async fn test_connection(
        &self,
        target: &ResolvedTarget,
        timeout: Duration,
    ) -> ConnectionProbe;

    async fn execute(
        &self,
        target: &ResolvedTarget,
        command: &str,
        timeout: Duration,
    ) -> ExecOutput;

    async fn copy_to(
        &self,
        target: &ResolvedTarget,
        local_path: &Path,
        remote_path: &str,
        timeout: Duration,
    ) -> TransferOutcome;

    async fn copy_from(
        &self,
        target: &ResolvedTarget,
        remote_path: &str,
        local_path: &Path,
        timeout: Duration,
    ) -> TransferOutcome;

    /// Best-effort host introspection; individual probe failures only omit
    /// the corresponding field.
    async fn get_info(
        &self,
        target: &ResolvedTarget,
        timeout: Duration,
    ) -> HostInfo {
        host_info::collect(self, target, timeout).await
    }
}
