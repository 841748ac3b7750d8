use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetscan_model::{
    RunId, RunStatus, ScanRun, TargetId, TargetResult, TargetStatus, TenantId,
};
use tokio::sync::RwLock;

use super::{ResultStore, RunCompletion, RunQuery};
use crate::error::{Result, ScanError};

/// Process-local result store. State is lost on restart.
#[derive(Default)]
pub struct InMemoryResultStore {
    runs: RwLock<HashMap<RunId, ScanRun>>,
    results: RwLock<HashMap<RunId, Vec<TargetResult>>>,
}

impl fmt::Debug for InMemoryResultStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let runs = self.runs.try_read().ok().map(|guard| guard.len());
        let results = self
            .results
            .try_read()
            .ok()
            .map(|guard| guard.values().map(Vec::len).sum::<usize>());
        f.debug_struct("InMemoryResultStore")
            .field("runs", &runs)
            .field("results", &results)
            .finish()
    }
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn create_run(&self, run: &ScanRun) -> Result<()> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&run.id) {
            return Err(ScanError::Persistence(format!(
                "run {} already exists",
                run.id
            )));
        }
        runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, tenant: TenantId, id: RunId) -> Result<Option<ScanRun>> {
        Ok(self
            .runs
            .read()
            .await
            .get(&id)
            .filter(|run| run.tenant == tenant)
            .cloned())
    }

    async fn list_runs(
        &self,
        tenant: TenantId,
        query: RunQuery,
    ) -> Result<Vec<ScanRun>> {
        let query = query.normalized();
        let mut runs: Vec<ScanRun> = self
            .runs
            .read()
            .await
            .values()
            .filter(|run| run.tenant == tenant)
            .filter(|run| query.status.is_none_or(|status| run.status == status))
            .cloned()
            .collect();
        runs.sort_by(|a, b| {
            b.started_at.cmp(&a.started_at).then_with(|| b.id.cmp(&a.id))
        });
        Ok(runs
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn list_running_runs(&self) -> Result<Vec<ScanRun>> {
        Ok(self
            .runs
            .read()
            .await
            .values()
            .filter(|run| run.status == RunStatus::Running)
            .cloned()
            .collect())
    }

    async fn update_run_progress(
        &self,
        id: RunId,
        completed: u32,
        failed: u32,
    ) -> Result<()> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(&id)
            .ok_or_else(|| ScanError::NotFound(format!("run {id}")))?;
        run.completed = completed;
        run.failed = failed;
        Ok(())
    }

    async fn mark_run_cancelled(
        &self,
        tenant: TenantId,
        id: RunId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut runs = self.runs.write().await;
        match runs.get_mut(&id).filter(|run| run.tenant == tenant) {
            Some(run) if run.status == RunStatus::Running => {
                run.status = RunStatus::Cancelled;
                run.completed_at = Some(at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(ScanError::NotFound(format!("run {id}"))),
        }
    }

    async fn finish_run(&self, id: RunId, completion: RunCompletion) -> Result<()> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(&id)
            .ok_or_else(|| ScanError::NotFound(format!("run {id}")))?;
        if run.status != RunStatus::Cancelled {
            run.status = completion.status;
            run.completed_at = Some(completion.completed_at);
        }
        run.completed = completion.completed;
        run.failed = completion.failed;
        if completion.error.is_some() {
            run.error = completion.error;
        }
        Ok(())
    }

    async fn insert_result(&self, result: &TargetResult) -> Result<()> {
        if !self.runs.read().await.contains_key(&result.run_id) {
            return Err(ScanError::NotFound(format!("run {}", result.run_id)));
        }
        self.results
            .write()
            .await
            .entry(result.run_id)
            .or_default()
            .push(result.clone());
        Ok(())
    }

    async fn update_result(&self, result: &TargetResult) -> Result<()> {
        let mut results = self.results.write().await;
        let existing = results
            .get_mut(&result.run_id)
            .and_then(|rows| rows.iter_mut().find(|row| row.id == result.id))
            .ok_or_else(|| ScanError::NotFound(format!("result {}", result.id)))?;

        if !existing.status.can_transition_to(result.status) {
            return Err(ScanError::InvalidState(format!(
                "result {} cannot move from {} to {}",
                result.id, existing.status, result.status
            )));
        }
        *existing = result.clone();
        Ok(())
    }

    async fn results_for_run(&self, run_id: RunId) -> Result<Vec<TargetResult>> {
        let mut rows = self
            .results
            .read()
            .await
            .get(&run_id)
            .cloned()
            .unwrap_or_default();
        rows.sort_by_key(|row| row.started_at);
        Ok(rows)
    }

    async fn results_for_target(
        &self,
        tenant: TenantId,
        target_id: TargetId,
        limit: u32,
    ) -> Result<Vec<TargetResult>> {
        let mut rows: Vec<TargetResult> = self
            .results
            .read()
            .await
            .values()
            .flatten()
            .filter(|row| row.tenant == tenant && row.target_id == target_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn fail_unfinished_results(
        &self,
        run_id: RunId,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<u32> {
        let mut results = self.results.write().await;
        let mut touched = 0;
        for row in results.get_mut(&run_id).into_iter().flatten() {
            if !row.status.is_terminal() {
                row.status = TargetStatus::Failed;
                row.completed_at = Some(at);
                row.error = Some(error.to_string());
                touched += 1;
            }
        }
        Ok(touched)
    }
}
