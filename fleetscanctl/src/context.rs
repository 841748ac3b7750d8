use std::{collections::BTreeSet, env, path::Path, sync::Arc};

use anyhow::{Context as _, anyhow, bail};
use fleetscan_config::{
    ConfigSource, FleetscanConfig, Inventory, find_target, models::CONFIG_PATH_VAR,
};
use fleetscan_core::{
    OrchestratorParts, ReportAggregator, ScanOrchestrator,
    channel::SshChannel,
    directory::InMemoryTargetDirectory,
    events::RunEventBus,
    store::{InMemoryResultStore, PostgresResultStore, ResultStore},
};
use fleetscan_model::{Target, TenantId};
use tracing::{debug, info, warn};

use crate::cli::Cli;

/// Everything a subcommand needs, wired from configuration and inventory.
pub struct AppContext {
    pub config: FleetscanConfig,
    pub tenant: TenantId,
    pub targets: Vec<Target>,
    pub persistent: bool,
    pub channel: Arc<SshChannel>,
    pub orchestrator: ScanOrchestrator,
    pub reports: ReportAggregator,
}

impl AppContext {
    pub async fn build(cli: &Cli) -> anyhow::Result<Self> {
        let (config, source) = load_config(cli.config.as_deref())?;
        config.validate().context("invalid fleetscan configuration")?;
        match &source {
            ConfigSource::Default => debug!(target: "scan::config", "using default configuration"),
            other => info!(target: "scan::config", source = ?other, "configuration loaded"),
        }

        let inventory = match cli.inventory.as_ref().or(config.inventory_path.as_ref()) {
            Some(path) => Inventory::load(path)?,
            None => Inventory::default(),
        };
        let default_tenant = inventory.tenant;
        let all_targets = inventory.into_targets()?;
        let tenant = pick_tenant(cli.tenant, default_tenant, &all_targets)?;
        let targets: Vec<Target> = all_targets
            .into_iter()
            .filter(|target| target.tenant == tenant)
            .collect();
        debug!(target: "scan::config", tenant = %tenant, targets = targets.len(), "inventory loaded");

        let (store, persistent): (Arc<dyn ResultStore>, bool) = match &config.database.url {
            Some(url) => (Arc::new(PostgresResultStore::connect(url).await?), true),
            None => (Arc::new(InMemoryResultStore::new()), false),
        };

        let directory = Arc::new(InMemoryTargetDirectory::from_targets(targets.clone()));
        let channel = Arc::new(SshChannel::new(config.ssh.clone()));
        let orchestrator = ScanOrchestrator::new(
            config.orchestrator.clone(),
            config.payload.clone(),
            OrchestratorParts::new(directory.clone(), store.clone(), channel.clone())
                .with_events(Arc::new(RunEventBus::new(config.orchestrator.event_capacity))),
        );
        let reports = ReportAggregator::new(store, directory);

        Ok(Self {
            config,
            tenant,
            targets,
            persistent,
            channel,
            orchestrator,
            reports,
        })
    }

    /// Commands that read stored runs are pointless against a store that
    /// starts empty with every process.
    pub fn require_database(&self, command: &str) -> anyhow::Result<()> {
        if self.persistent {
            return Ok(());
        }
        bail!(
            "`{command}` reads stored runs; set DATABASE_URL or `database.url` to a Postgres database"
        )
    }

    /// Inventory targets matching `keys` (names or ids), or every target of
    /// the tenant when `keys` is empty.
    pub fn select_targets(&self, keys: &[String]) -> anyhow::Result<Vec<Target>> {
        if keys.is_empty() {
            if self.targets.is_empty() {
                bail!("the inventory has no targets for tenant {}", self.tenant);
            }
            return Ok(self.targets.clone());
        }

        keys.iter()
            .map(|key| {
                find_target(&self.targets, key)
                    .cloned()
                    .ok_or_else(|| anyhow!("no inventory target named or with id '{key}'"))
            })
            .collect()
    }
}

fn load_config(explicit: Option<&Path>) -> anyhow::Result<(FleetscanConfig, ConfigSource)> {
    let Some(path) = explicit else {
        return FleetscanConfig::load_from_env();
    };
    let path = path.display().to_string();
    let cwd = env::current_dir().context("failed to read working directory")?;
    FleetscanConfig::load_with(
        |key| {
            if key == CONFIG_PATH_VAR {
                Some(path.clone())
            } else {
                env::var(key).ok()
            }
        },
        &cwd,
    )
}

fn pick_tenant(
    explicit: Option<TenantId>,
    inventory_default: Option<TenantId>,
    targets: &[Target],
) -> anyhow::Result<TenantId> {
    if let Some(tenant) = explicit.or(inventory_default) {
        return Ok(tenant);
    }
    let tenants: BTreeSet<TenantId> = targets.iter().map(|t| t.tenant).collect();
    match tenants.len() {
        1 => Ok(*tenants.iter().next().ok_or_else(|| anyhow!("no tenant"))?),
        0 => bail!("no tenant given; pass --tenant or set FLEETSCAN_TENANT"),
        n => {
            warn!(target: "scan::config", tenants = n, "inventory spans several tenants");
            bail!("the inventory spans {n} tenants; pick one with --tenant")
        }
    }
}
