use std::time::Duration;

use fleetscan_model::ScanOptions;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// Limits and deadlines applied by the orchestrator to every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Batch size used when a caller leaves parallelism to the server.
    pub default_parallelism: usize,
    /// Upper bound accepted for a caller-supplied parallelism.
    pub max_parallelism: usize,
    pub connect_timeout_ms: u64,
    pub execute_timeout_ms: u64,
    pub transfer_timeout_ms: u64,
    pub info_timeout_ms: u64,
    /// Buffer size of the run event bus.
    pub event_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_parallelism: 4,
            max_parallelism: 64,
            connect_timeout_ms: 10_000,
            execute_timeout_ms: 600_000,
            transfer_timeout_ms: 120_000,
            info_timeout_ms: 15_000,
            event_capacity: 256,
        }
    }
}

impl OrchestratorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn execute_timeout(&self) -> Duration {
        Duration::from_millis(self.execute_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn info_timeout(&self) -> Duration {
        Duration::from_millis(self.info_timeout_ms)
    }

    /// Options pre-filled with the configured default parallelism.
    pub fn default_options(&self) -> ScanOptions {
        ScanOptions::default().with_parallelism(self.default_parallelism)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_parallelism == 0 || self.max_parallelism == 0 {
            return Err(ScanError::Validation(
                "parallelism limits must be at least 1".into(),
            ));
        }
        if self.default_parallelism > self.max_parallelism {
            return Err(ScanError::Validation(format!(
                "default_parallelism ({}) exceeds max_parallelism ({})",
                self.default_parallelism, self.max_parallelism
            )));
        }
        for (name, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("execute_timeout_ms", self.execute_timeout_ms),
            ("transfer_timeout_ms", self.transfer_timeout_ms),
            ("info_timeout_ms", self.info_timeout_ms),
        ] {
            if value == 0 {
                return Err(ScanError::Validation(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    /// Reject a requested parallelism outside `1..=max_parallelism`.
    pub fn check_parallelism(&self, parallelism: usize) -> Result<()> {
        if parallelism == 0 {
            return Err(ScanError::Validation(
                "parallelism must be at least 1".into(),
            ));
        }
        if parallelism > self.max_parallelism {
            return Err(ScanError::Validation(format!(
                "parallelism {parallelism} exceeds the limit of {}",
                self.max_parallelism
            )));
        }
        Ok(())
    }
}
