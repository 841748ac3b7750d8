use std::sync::Arc;

use chrono::Utc;
use fleetscan_model::{
    ResolvedTarget, RunStatus, ScanRun, TargetId, TargetStatus,
};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    OrchestratorInner,
    target_task::{RunTicket, TargetOutcome},
};
use crate::{error::Result, events::RunEvent, store::RunCompletion};

/// Running totals of processed targets.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct Tally {
    pub completed: u32,
    pub failed: u32,
}

impl Tally {
    fn record(&mut self, succeeded: bool) {
        if succeeded {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
    }
}

impl OrchestratorInner {
    /// Owns a run from spawn until its terminal write. A driver that panics
    /// still leaves the run `failed` with the panic recorded. `finished` is
    /// cancelled on exit, after the run left the active map.
    pub(super) async fn supervise(
        self: Arc<Self>,
        run: ScanRun,
        targets: Vec<ResolvedTarget>,
        cancel: CancellationToken,
        finished: CancellationToken,
    ) {
        let _finished = finished.drop_guard();
        let run_id = run.id;
        let driver =
            tokio::spawn(Arc::clone(&self).drive(run.clone(), targets, cancel));

        if let Err(join_err) = driver.await {
            error!(
                target: "scan::orchestrator",
                run = %run_id,
                error = %join_err,
                "scan driver stopped unexpectedly"
            );
            let message = format!("scan driver stopped unexpectedly: {join_err}");
            if let Err(err) = self
                .settle_interrupted(&run, "scan aborted before completion", &message)
                .await
            {
                error!(
                    target: "scan::orchestrator",
                    run = %run_id,
                    error = %err,
                    "failed to record aborted run"
                );
            }
        }

        self.active.remove(&run_id);
    }

    async fn drive(
        self: Arc<Self>,
        run: ScanRun,
        targets: Vec<ResolvedTarget>,
        cancel: CancellationToken,
    ) {
        let parallelism = run.options.parallelism.max(1);
        let batches = targets.len().div_ceil(parallelism);
        let ticket = Arc::new(RunTicket {
            run_id: run.id,
            tenant: run.tenant,
            command: self.payload.command(run.options.quick),
        });
        let mut tally = Tally::default();

        for (index, batch) in targets.chunks(parallelism).enumerate() {
            if self.cancellation_requested(&run, &cancel).await {
                info!(
                    target: "scan::orchestrator",
                    run = %run.id,
                    skipped = targets.len() - index * parallelism,
                    "run cancelled; remaining batches skipped"
                );
                break;
            }

            debug!(
                target: "scan::orchestrator",
                run = %run.id,
                batch = index + 1,
                batches,
                size = batch.len(),
                "starting batch"
            );

            for outcome in self.run_batch(&ticket, batch).await {
                tally.record(outcome.succeeded);
            }
            self.report_progress(&run, tally).await;
        }

        self.complete(&run, tally, &cancel).await;
    }

    /// Run one batch concurrently and wait for every member to finish.
    async fn run_batch(
        self: &Arc<Self>,
        ticket: &Arc<RunTicket>,
        batch: &[ResolvedTarget],
    ) -> Vec<TargetOutcome> {
        let target_ids: Vec<TargetId> = batch.iter().map(|t| t.id).collect();
        let handles = batch.iter().map(|target| {
            tokio::spawn(
                Arc::clone(self).scan_target(Arc::clone(ticket), target.clone()),
            )
        });
        let joined = join_all(handles).await;

        let mut outcomes = Vec::with_capacity(joined.len());
        let mut aborted = false;
        for (target_id, joined) in target_ids.into_iter().zip(joined) {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    error!(
                        target: "scan::orchestrator",
                        run = %ticket.run_id,
                        target_id = %target_id,
                        error = %err,
                        "target task aborted"
                    );
                    aborted = true;
                    outcomes.push(TargetOutcome {
                        target_id,
                        succeeded: false,
                    });
                }
            }
        }

        // Every other member of the batch is terminal by now, so only the
        // aborted tasks' results are still open.
        if aborted
            && let Err(err) = self
                .store
                .fail_unfinished_results(
                    ticket.run_id,
                    "scan task aborted",
                    Utc::now(),
                )
                .await
        {
            warn!(
                target: "scan::orchestrator",
                run = %ticket.run_id,
                error = %err,
                "failed to close results of aborted tasks"
            );
        }

        outcomes
    }

    /// True once the run was cancelled, either through this process' token
    /// or by a status flip in the store.
    async fn cancellation_requested(
        &self,
        run: &ScanRun,
        cancel: &CancellationToken,
    ) -> bool {
        if cancel.is_cancelled() {
            return true;
        }
        match self.store.get_run(run.tenant, run.id).await {
            Ok(Some(current)) => current.status == RunStatus::Cancelled,
            Ok(None) => false,
            Err(err) => {
                warn!(
                    target: "scan::orchestrator",
                    run = %run.id,
                    error = %err,
                    "could not re-read run status; continuing"
                );
                false
            }
        }
    }

    async fn report_progress(&self, run: &ScanRun, tally: Tally) {
        if let Err(err) = self
            .store
            .update_run_progress(run.id, tally.completed, tally.failed)
            .await
        {
            warn!(
                target: "scan::orchestrator",
                run = %run.id,
                error = %err,
                "failed to persist run progress"
            );
        }
        self.emit(RunEvent::Progress {
            run_id: run.id,
            completed: tally.completed,
            failed: tally.failed,
            total: run.total,
        })
        .await;
    }

    async fn complete(&self, run: &ScanRun, tally: Tally, cancel: &CancellationToken) {
        let status = if self.cancellation_requested(run, cancel).await {
            RunStatus::Cancelled
        } else if tally.failed == run.total {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        let completion = RunCompletion {
            status,
            completed: tally.completed,
            failed: tally.failed,
            completed_at: Utc::now(),
            error: None,
        };
        if let Err(err) = self.store.finish_run(run.id, completion).await {
            error!(
                target: "scan::orchestrator",
                run = %run.id,
                error = %err,
                "failed to persist run completion"
            );
        }
        // A cancel landing between the check above and `finish_run` wins in
        // the store; report what was stored.
        let status = match self.store.get_run(run.tenant, run.id).await {
            Ok(Some(stored)) if stored.status.is_terminal() => stored.status,
            Ok(_) => status,
            Err(err) => {
                warn!(
                    target: "scan::orchestrator",
                    run = %run.id,
                    error = %err,
                    "failed to re-read finished run"
                );
                status
            }
        };

        info!(
            target: "scan::orchestrator",
            run = %run.id,
            status = %status,
            completed = tally.completed,
            failed = tally.failed,
            total = run.total,
            "scan run finished"
        );
        self.emit(RunEvent::Finished {
            run_id: run.id,
            status,
            completed: tally.completed,
            failed: tally.failed,
        })
        .await;
    }

    /// Close out a run whose driver is gone: open results fail with
    /// `result_error`, the run fails with `run_error`, and its counters are
    /// rebuilt from the results that did finish.
    pub(super) async fn settle_interrupted(
        &self,
        run: &ScanRun,
        result_error: &str,
        run_error: &str,
    ) -> Result<()> {
        let now = Utc::now();
        self.store
            .fail_unfinished_results(run.id, result_error, now)
            .await?;

        let completed = self
            .store
            .results_for_run(run.id)
            .await?
            .iter()
            .filter(|result| result.status == TargetStatus::Completed)
            .count();
        let completed = u32::try_from(completed).unwrap_or(u32::MAX).min(run.total);
        let failed = run.total - completed;

        self.store
            .finish_run(
                run.id,
                RunCompletion {
                    status: RunStatus::Failed,
                    completed,
                    failed,
                    completed_at: now,
                    error: Some(run_error.to_string()),
                },
            )
            .await?;

        self.emit(RunEvent::Finished {
            run_id: run.id,
            status: RunStatus::Failed,
            completed,
            failed,
        })
        .await;
        Ok(())
    }
}
