//! Scan orchestration: accepts scan requests, fans them out over the remote
//! channel in fixed-size batches, and keeps run and target records current.
//!
//! `start_scan` returns as soon as the run record exists; the actual work
//! happens on a background driver task per run. Targets within a batch run
//! concurrently, batches run strictly one after another, and cancellation is
//! honoured at batch boundaries.

use std::{fmt, sync::Arc};

use chrono::Utc;
use dashmap::DashMap;
use fleetscan_model::{
    ResolvedTarget, RunId, RunStatus, ScanOptions, ScanRun, TargetId,
    TargetResult, TenantId,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::{
    channel::RemoteChannel,
    directory::TargetDirectory,
    error::{Result, ScanError},
    events::{RunEvent, RunEventBus, RunEventPublisher, RunSubscription},
    parser::{LineSeverityParser, SeverityParser},
    payload::PayloadConfig,
    store::{ResultStore, RunQuery},
};

pub mod config;
mod driver;
mod target_task;

pub use config::OrchestratorConfig;

/// Key under `ScanOptions::extra` recording the payload version a run used.
pub const PAYLOAD_VERSION_KEY: &str = "payload_version";

const INTERRUPTED_RESULT_ERROR: &str = "interrupted before completion";
const INTERRUPTED_RUN_ERROR: &str = "orchestrator restarted before run completed";

/// Ports the orchestrator drives.
pub struct OrchestratorParts {
    pub directory: Arc<dyn TargetDirectory>,
    pub store: Arc<dyn ResultStore>,
    pub channel: Arc<dyn RemoteChannel>,
    pub parser: Arc<dyn SeverityParser>,
    pub events: Arc<RunEventBus>,
}

impl fmt::Debug for OrchestratorParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorParts")
            .field("directory_ptr", &Arc::as_ptr(&self.directory))
            .field("store_ptr", &Arc::as_ptr(&self.store))
            .field("channel_ptr", &Arc::as_ptr(&self.channel))
            .field("events", &self.events)
            .finish()
    }
}

impl OrchestratorParts {
    /// Parts with the line-oriented severity parser and a fresh event bus.
    pub fn new(
        directory: Arc<dyn TargetDirectory>,
        store: Arc<dyn ResultStore>,
        channel: Arc<dyn RemoteChannel>,
    ) -> Self {
        Self {
            directory,
            store,
            channel,
            parser: Arc::new(LineSeverityParser),
            events: Arc::new(RunEventBus::default()),
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn SeverityParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_events(mut self, events: Arc<RunEventBus>) -> Self {
        self.events = events;
        self
    }
}

/// Acknowledgement returned by [`ScanOrchestrator::start_scan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanAccepted {
    pub run_id: RunId,
    pub status: RunStatus,
    pub total_targets: u32,
}

/// A run together with every target result recorded for it so far.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanStatusView {
    pub run: ScanRun,
    pub results: Vec<TargetResult>,
}

struct RunHandle {
    cancel: CancellationToken,
    /// Cancelled by the supervisor once the run's terminal write is done.
    finished: CancellationToken,
}

pub(crate) struct OrchestratorInner {
    config: OrchestratorConfig,
    payload: PayloadConfig,
    directory: Arc<dyn TargetDirectory>,
    store: Arc<dyn ResultStore>,
    channel: Arc<dyn RemoteChannel>,
    parser: Arc<dyn SeverityParser>,
    events: Arc<RunEventBus>,
    active: DashMap<RunId, RunHandle>,
}

impl OrchestratorInner {
    async fn emit(&self, event: RunEvent) {
        if let Err(err) = self.events.publish(event).await {
            warn!(
                target: "scan::orchestrator",
                error = %err,
                "failed to publish run event"
            );
        }
    }
}

#[derive(Clone)]
pub struct ScanOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl fmt::Debug for ScanOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanOrchestrator")
            .field("config", &self.inner.config)
            .field("payload_version", &self.inner.payload.version)
            .field("active_runs", &self.inner.active.len())
            .field("events", &self.inner.events)
            .field("store_ptr", &Arc::as_ptr(&self.inner.store))
            .finish()
    }
}

impl ScanOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        payload: PayloadConfig,
        parts: OrchestratorParts,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                payload,
                directory: parts.directory,
                store: parts.store,
                channel: parts.channel,
                parser: parts.parser,
                events: parts.events,
                active: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn events(&self) -> Arc<RunEventBus> {
        Arc::clone(&self.inner.events)
    }

    /// Events of a single run, ending with its `Finished` event.
    pub fn subscribe(&self, run_id: RunId) -> RunSubscription {
        self.inner.events.subscribe(run_id)
    }

    /// Whether a driver task for `run_id` is alive in this process.
    pub fn is_active(&self, run_id: RunId) -> bool {
        self.inner.active.contains_key(&run_id)
    }

    /// Validate the request, record a `running` run and hand it to a
    /// background driver. Returns before any target is contacted.
    #[instrument(
        target = "scan::orchestrator",
        skip(self, target_ids, options),
        fields(tenant = %tenant, requested = target_ids.len())
    )]
    pub async fn start_scan(
        &self,
        tenant: TenantId,
        target_ids: &[TargetId],
        options: ScanOptions,
        requested_by: &str,
    ) -> Result<ScanAccepted> {
        if target_ids.is_empty() {
            return Err(ScanError::Validation(
                "at least one target id is required".into(),
            ));
        }
        self.inner.config.check_parallelism(options.parallelism)?;

        let targets = self
            .inner
            .directory
            .resolve_by_ids(tenant, target_ids)
            .await?;
        if targets.is_empty() {
            return Err(ScanError::Validation(
                "none of the requested targets could be resolved".into(),
            ));
        }
        if targets.len() < target_ids.len() {
            info!(
                target: "scan::orchestrator",
                requested = target_ids.len(),
                resolved = targets.len(),
                "some requested targets were unknown or duplicated"
            );
        }

        let total = u32::try_from(targets.len()).map_err(|_| {
            ScanError::Validation("too many targets in one run".into())
        })?;
        let started_at = Utc::now();
        let mut options = options;
        options.extra.insert(
            PAYLOAD_VERSION_KEY.to_string(),
            self.inner.payload.version.clone(),
        );
        let name = options.name.clone().unwrap_or_else(|| {
            format!("Fleet scan {}", started_at.format("%Y-%m-%d %H:%M:%S UTC"))
        });

        let run = ScanRun {
            id: RunId::new(),
            tenant,
            name,
            target_ids: targets.iter().map(|t| t.id).collect(),
            status: RunStatus::Running,
            total,
            completed: 0,
            failed: 0,
            started_at,
            completed_at: None,
            options,
            created_by: requested_by.to_string(),
            error: None,
        };
        self.inner.store.create_run(&run).await?;

        info!(
            target: "scan::orchestrator",
            run = %run.id,
            total,
            parallelism = run.options.parallelism,
            quick = run.options.quick,
            "scan run accepted"
        );
        self.inner
            .emit(RunEvent::Started {
                run_id: run.id,
                total,
            })
            .await;

        let accepted = ScanAccepted {
            run_id: run.id,
            status: run.status,
            total_targets: total,
        };
        self.spawn_driver(run, targets);
        Ok(accepted)
    }

    fn spawn_driver(
        &self,
        run: ScanRun,
        targets: Vec<ResolvedTarget>,
    ) {
        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();
        // Registered before spawning so a fast driver can always deregister.
        self.inner.active.insert(
            run.id,
            RunHandle {
                cancel: cancel.clone(),
                finished: finished.clone(),
            },
        );
        tokio::spawn(Arc::clone(&self.inner).supervise(run, targets, cancel, finished));
    }

    /// Current run record plus its target results, read straight from the
    /// store.
    pub async fn get_scan_status(
        &self,
        tenant: TenantId,
        run_id: RunId,
    ) -> Result<ScanStatusView> {
        let run = self.load_run(tenant, run_id).await?;
        let results = self.inner.store.results_for_run(run_id).await?;
        Ok(ScanStatusView { run, results })
    }

    /// Runs of `tenant`, newest first.
    pub async fn list_scans(
        &self,
        tenant: TenantId,
        query: RunQuery,
    ) -> Result<Vec<ScanRun>> {
        self.inner.store.list_runs(tenant, query.normalized()).await
    }

    /// Flip a running run to `cancelled`. Targets already in flight finish;
    /// no new batch starts afterwards.
    #[instrument(target = "scan::orchestrator", skip(self), fields(tenant = %tenant, run = %run_id))]
    pub async fn cancel_scan(
        &self,
        tenant: TenantId,
        run_id: RunId,
    ) -> Result<ScanRun> {
        let run = self.load_run(tenant, run_id).await?;
        if run.status != RunStatus::Running {
            return Err(ScanError::InvalidState(format!(
                "run {run_id} is {} and cannot be cancelled",
                run.status
            )));
        }

        let flipped = self
            .inner
            .store
            .mark_run_cancelled(tenant, run_id, Utc::now())
            .await?;
        if !flipped {
            return Err(ScanError::InvalidState(format!(
                "run {run_id} finished before it could be cancelled"
            )));
        }

        if let Some(handle) = self.inner.active.get(&run_id) {
            handle.cancel.cancel();
        }
        info!(target: "scan::orchestrator", run = %run_id, "scan run cancelled");

        self.load_run(tenant, run_id).await
    }

    /// Wait for the run's driver to finish and return the final record. Any
    /// number of callers may wait on the same run. Runs driven by another
    /// process or already finished return immediately.
    pub async fn wait_for_run(
        &self,
        tenant: TenantId,
        run_id: RunId,
    ) -> Result<ScanRun> {
        self.load_run(tenant, run_id).await?;

        let finished = self
            .inner
            .active
            .get(&run_id)
            .map(|handle| handle.finished.clone());
        if let Some(finished) = finished {
            finished.cancelled().await;
        }

        self.load_run(tenant, run_id).await
    }

    /// Fail every run left `running` without a live driver in this process,
    /// e.g. after a restart. Returns how many runs were closed.
    #[instrument(target = "scan::orchestrator", skip(self))]
    pub async fn reconcile_stale_runs(&self) -> Result<u32> {
        let mut reconciled = 0;
        for run in self.inner.store.list_running_runs().await? {
            if self.is_active(run.id) {
                continue;
            }
            warn!(
                target: "scan::orchestrator",
                run = %run.id,
                tenant = %run.tenant,
                "closing run left running by a previous process"
            );
            self.inner
                .settle_interrupted(&run, INTERRUPTED_RESULT_ERROR, INTERRUPTED_RUN_ERROR)
                .await?;
            reconciled += 1;
        }
        Ok(reconciled)
    }

    async fn load_run(&self, tenant: TenantId, run_id: RunId) -> Result<ScanRun> {
        self.inner
            .store
            .get_run(tenant, run_id)
            .await?
            .ok_or_else(|| ScanError::NotFound(format!("scan run {run_id}")))
    }
}
