#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use fleetscan_core::{
    OrchestratorConfig, OrchestratorParts, ReportAggregator, ScanOrchestrator,
    channel::{
        ConnectionProbe, ExecOutput, FailureKind, RemoteChannel,
        TransferOutcome,
    },
    directory::InMemoryTargetDirectory,
    payload::PayloadConfig,
    store::{InMemoryResultStore, ResultStore},
};
use fleetscan_model::{
    ResolvedTarget, RunId, ScanOptions, ScanRun, Target, TargetHealth,
    TargetId, TenantId,
};
use tokio::sync::Semaphore;

/// How the fake channel treats one target.
#[derive(Debug, Clone)]
pub enum Script {
    /// Connects, then the payload runs for `latency` and prints `stdout`.
    Succeed { latency: Duration, stdout: String },
    /// The connection test times out after `after`.
    TimeOut { after: Duration },
    /// The connection is refused immediately.
    Refuse,
    /// Connects, but the payload exits with `code`.
    Exit { code: i32, stderr: String },
}

impl Script {
    pub fn ok(stdout: &str) -> Self {
        Script::Succeed {
            latency: Duration::from_millis(5),
            stdout: stdout.to_string(),
        }
    }

    pub fn slow(latency_ms: u64, stdout: &str) -> Self {
        Script::Succeed {
            latency: Duration::from_millis(latency_ms),
            stdout: stdout.to_string(),
        }
    }
}

/// Scripted in-process channel keyed by target name. Records the order in
/// which payloads start and end and the peak number running at once.
#[derive(Debug)]
pub struct FakeChannel {
    scripts: Mutex<HashMap<String, Script>>,
    fallback: Script,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    connections: AtomicUsize,
    log: Mutex<Vec<String>>,
    gate: Option<Semaphore>,
}

impl FakeChannel {
    pub fn new(fallback: Script) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            connections: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Payloads block until [`FakeChannel::release`] hands out permits.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn script(self, name: &str, script: Script) -> Self {
        self.set_script(name, script);
        self
    }

    pub fn set_script(&self, name: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(name.to_string(), script);
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn connection_attempts(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// `start:<name>` / `end:<name>` entries in the order they happened.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn started(&self) -> usize {
        self.log()
            .iter()
            .filter(|entry| entry.starts_with("start:"))
            .count()
    }

    fn script_for(&self, target: &ResolvedTarget) -> Script {
        self.scripts
            .lock()
            .unwrap()
            .get(&target.name)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl RemoteChannel for FakeChannel {
    async fn test_connection(
        &self,
        target: &ResolvedTarget,
        _timeout: Duration,
    ) -> ConnectionProbe {
        self.connections.fetch_add(1, Ordering::SeqCst);
        match self.script_for(target) {
            Script::TimeOut { after } => {
                tokio::time::sleep(after).await;
                ConnectionProbe::failed(
                    after,
                    FailureKind::Timeout,
                    format!("connection to {} timed out", target.host),
                )
            }
            Script::Refuse => ConnectionProbe::failed(
                Duration::ZERO,
                FailureKind::Refused,
                "connection refused",
            ),
            _ => ConnectionProbe::ok(Duration::from_millis(1)),
        }
    }

    async fn execute(
        &self,
        target: &ResolvedTarget,
        _command: &str,
        _timeout: Duration,
    ) -> ExecOutput {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        self.record(format!("start:{}", target.name));

        if let Some(gate) = &self.gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }

        let output = match self.script_for(target) {
            Script::Succeed { latency, stdout } => {
                tokio::time::sleep(latency).await;
                ExecOutput {
                    success: true,
                    exit_code: Some(0),
                    stdout,
                    stderr: String::new(),
                    duration: latency,
                    failure: None,
                }
            }
            Script::Exit { code, stderr } => ExecOutput {
                success: false,
                exit_code: Some(code),
                stdout: String::new(),
                stderr,
                duration: Duration::from_millis(1),
                failure: Some(FailureKind::NonZeroExit),
            },
            Script::TimeOut { .. } | Script::Refuse => ExecOutput::failed(
                Duration::ZERO,
                FailureKind::ChannelError,
                "execute called on an unreachable target",
            ),
        };

        self.record(format!("end:{}", target.name));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        output
    }

    async fn copy_to(
        &self,
        _target: &ResolvedTarget,
        _local_path: &Path,
        _remote_path: &str,
        _timeout: Duration,
    ) -> TransferOutcome {
        TransferOutcome::ok()
    }

    async fn copy_from(
        &self,
        _target: &ResolvedTarget,
        _remote_path: &str,
        _local_path: &Path,
        _timeout: Duration,
    ) -> TransferOutcome {
        TransferOutcome::ok()
    }
}

/// A tenant's fleet wired to an orchestrator and an aggregator.
pub struct Fleet {
    pub tenant: TenantId,
    pub targets: Vec<Target>,
    pub channel: Arc<FakeChannel>,
    pub store: Arc<dyn ResultStore>,
    pub directory: Arc<InMemoryTargetDirectory>,
    pub orchestrator: ScanOrchestrator,
    pub reports: ReportAggregator,
}

pub fn target(tenant: TenantId, name: &str) -> Target {
    Target {
        id: TargetId::new(),
        tenant,
        name: name.to_string(),
        host: format!("{name}.fleet.internal"),
        port: 22,
        username: "scanner".into(),
        credential_ref: Some("/etc/fleetscan/keys/scanner".into()),
        tags: vec!["test".into()],
        last_status: TargetHealth::Unknown,
        last_scanned_at: None,
    }
}

impl Fleet {
    pub fn new(names: &[&str], channel: FakeChannel) -> Self {
        Self::with_store(names, channel, Arc::new(InMemoryResultStore::new()))
    }

    pub fn with_store(
        names: &[&str],
        channel: FakeChannel,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        let tenant = TenantId::new();
        let targets: Vec<Target> =
            names.iter().map(|name| target(tenant, name)).collect();
        let directory =
            Arc::new(InMemoryTargetDirectory::from_targets(targets.clone()));
        let channel = Arc::new(channel);
        let parts = OrchestratorParts::new(
            directory.clone(),
            store.clone(),
            channel.clone(),
        );
        let orchestrator = ScanOrchestrator::new(
            OrchestratorConfig::default(),
            PayloadConfig::default(),
            parts,
        );
        let reports = ReportAggregator::new(store.clone(), directory.clone());

        Self {
            tenant,
            targets,
            channel,
            store,
            directory,
            orchestrator,
            reports,
        }
    }

    pub fn ids(&self) -> Vec<TargetId> {
        self.targets.iter().map(|t| t.id).collect()
    }

    pub fn id_of(&self, name: &str) -> TargetId {
        self.targets
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.id)
            .unwrap_or_else(|| panic!("no target named {name}"))
    }

    pub async fn start(&self, parallelism: usize) -> RunId {
        self.orchestrator
            .start_scan(
                self.tenant,
                &self.ids(),
                ScanOptions::default().with_parallelism(parallelism),
                "ci@example.com",
            )
            .await
            .expect("scan accepted")
            .run_id
    }

    pub async fn scan(&self, parallelism: usize) -> ScanRun {
        let run_id = self.start(parallelism).await;
        self.orchestrator
            .wait_for_run(self.tenant, run_id)
            .await
            .expect("run finishes")
    }
}
