//! Result store port: durable records for scan runs and per-target results.
//!
//! The orchestrator is the only writer. Every method that takes a tenant is
//! scoped to it; a run owned by another tenant is reported as absent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetscan_model::{
    RunId, RunStatus, ScanRun, TargetId, TargetResult, TenantId,
};

use crate::error::Result;

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

pub use memory::InMemoryResultStore;
#[cfg(feature = "database")]
pub use postgres::PostgresResultStore;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 200;

/// Filter + page window for listing runs, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunQuery {
    pub status: Option<RunStatus>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for RunQuery {
    fn default() -> Self {
        Self {
            status: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl RunQuery {
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// Clamp the page size into `1..=MAX_PAGE_SIZE`.
    pub fn normalized(mut self) -> Self {
        self.limit = self.limit.clamp(1, MAX_PAGE_SIZE);
        self
    }
}

/// Final write for a run leaving `running`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCompletion {
    pub status: RunStatus,
    pub completed: u32,
    pub failed: u32,
    pub completed_at: DateTime<Utc>,
    pub error: Option<String>,
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn create_run(&self, run: &ScanRun) -> Result<()>;

    async fn get_run(&self, tenant: TenantId, id: RunId) -> Result<Option<ScanRun>>;

    async fn list_runs(
        &self,
        tenant: TenantId,
        query: RunQuery,
    ) -> Result<Vec<ScanRun>>;

    /// Every run currently marked `running`, across tenants.
    async fn list_running_runs(&self) -> Result<Vec<ScanRun>>;

    /// Persist batch-granularity progress counters.
    async fn update_run_progress(
        &self,
        id: RunId,
        completed: u32,
        failed: u32,
    ) -> Result<()>;

    /// Atomically flip a `running` run to `cancelled`. Returns false when the
    /// run was not running at the time of the write.
    async fn mark_run_cancelled(
        &self,
        tenant: TenantId,
        id: RunId,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Write final counters. A run already `cancelled` keeps that status;
    /// only its counters and error are updated.
    async fn finish_run(&self, id: RunId, completion: RunCompletion) -> Result<()>;

    async fn insert_result(&self, result: &TargetResult) -> Result<()>;

    /// Replace the mutable fields of an existing result.
    async fn update_result(&self, result: &TargetResult) -> Result<()>;

    /// Results of one run ordered by start time.
    async fn results_for_run(&self, run_id: RunId) -> Result<Vec<TargetResult>>;

    /// Most recent `limit` results for a target across all runs, newest first.
    async fn results_for_target(
        &self,
        tenant: TenantId,
        target_id: TargetId,
        limit: u32,
    ) -> Result<Vec<TargetResult>>;

    /// Fail every result of `run_id` still pending or running. Returns how
    /// many were touched.
    async fn fail_unfinished_results(
        &self,
        run_id: RunId,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<u32>;
}
