use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};
use fleetscan_core::ExportFormat;
use fleetscan_model::{RunId, RunStatus, TenantId};

#[derive(Debug, Parser)]
#[command(
    name = "fleetscanctl",
    version,
    about = "Run security scans across a fleet of SSH hosts and report on the results"
)]
pub struct Cli {
    /// Tenant whose targets and runs are addressed. Defaults to the
    /// inventory's tenant.
    #[arg(long, global = true, env = "FLEETSCAN_TENANT")]
    pub tenant: Option<TenantId>,

    /// Configuration file (TOML or JSON). Overrides FLEETSCAN_CONFIG_PATH.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Target inventory file. Overrides `inventory_path` from the config.
    #[arg(long, global = true)]
    pub inventory: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a scan run against inventory targets
    Scan(ScanArgs),
    /// Show a run and its per-target results
    Status { run_id: RunId },
    /// List runs, newest first
    List(ListArgs),
    /// Cancel a running scan; targets already in flight still finish
    Cancel { run_id: RunId },
    /// Build and export a report
    Report {
        #[command(subcommand)]
        kind: ReportKind,
    },
    /// Test connectivity to targets and print host details
    Probe(ProbeArgs),
    /// Fail runs left `running` by a process that is gone
    Reconcile,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Target names or ids; every inventory target of the tenant when empty.
    pub targets: Vec<String>,

    /// Targets scanned simultaneously per batch.
    #[arg(long, short = 'p')]
    pub parallelism: Option<usize>,

    /// Run the quick payload variant.
    #[arg(long)]
    pub quick: bool,

    /// Display name for the run.
    #[arg(long)]
    pub name: Option<String>,

    /// Recorded as the run's creator.
    #[arg(long, env = "USER", default_value = "fleetscanctl")]
    pub requested_by: String,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long, value_enum)]
    pub status: Option<StatusFilter>,
    #[arg(long, default_value_t = fleetscan_core::store::DEFAULT_PAGE_SIZE)]
    pub limit: u32,
    #[arg(long, default_value_t = 0)]
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusFilter {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl From<StatusFilter> for RunStatus {
    fn from(value: StatusFilter) -> Self {
        match value {
            StatusFilter::Running => RunStatus::Running,
            StatusFilter::Completed => RunStatus::Completed,
            StatusFilter::Failed => RunStatus::Failed,
            StatusFilter::Cancelled => RunStatus::Cancelled,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ReportKind {
    /// Statistics and per-target rows for one run
    Consolidated {
        run_id: RunId,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Severity and success deltas between two runs
    Compare {
        baseline: RunId,
        current: RunId,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Recent history and trend for one target
    Server {
        /// Target name or id.
        target: String,
        #[arg(long, default_value_t = fleetscan_core::report::DEFAULT_HISTORY_LIMIT)]
        limit: u32,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    /// json, csv or text.
    #[arg(long, short = 'f', default_value = "text")]
    pub format: ExportFormat,
    /// Write to this file instead of stdout.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Target names or ids; every inventory target of the tenant when empty.
    pub targets: Vec<String>,
    /// Per-probe deadline, e.g. `5s` or `1m`.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,
    /// Only test connectivity; skip host introspection.
    #[arg(long)]
    pub connect_only: bool,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn scan_flags_parse() {
        let cli = Cli::try_parse_from([
            "fleetscanctl",
            "scan",
            "web-1",
            "db-1",
            "-p",
            "8",
            "--quick",
            "--name",
            "nightly",
        ])
        .expect("parse");
        let Command::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(args.targets, vec!["web-1", "db-1"]);
        assert_eq!(args.parallelism, Some(8));
        assert!(args.quick);
        assert_eq!(args.name.as_deref(), Some("nightly"));
    }

    #[test]
    fn report_format_rejects_unknown_values() {
        let err = Cli::try_parse_from([
            "fleetscanctl",
            "report",
            "consolidated",
            "0199c1a4-9b52-7d61-a7e4-1f9f4c1d2e01",
            "--format",
            "xml",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn probe_timeout_uses_humantime() {
        let cli = Cli::try_parse_from(["fleetscanctl", "probe", "--timeout", "1m 30s"])
            .expect("parse");
        let Command::Probe(args) = cli.command else {
            panic!("expected probe");
        };
        assert_eq!(args.timeout, Some(Duration::from_secs(90)));
    }
}
