//! # Fleetscan Core
//!
//! Scan orchestration across a fleet of remote hosts and the reporting that
//! turns per-host outcomes into fleet-wide statistics.
//!
//! ## Overview
//!
//! - **Remote channel**: connection test, command execution and file transfer
//!   against one target, with hard timeouts ([`channel`])
//! - **Scan orchestrator**: bounded-batch fan-out of one run over its targets,
//!   progress events and cooperative cancellation ([`orchestrator`])
//! - **Report aggregator**: consolidated run statistics, run comparison and
//!   per-target trends, exportable as JSON, CSV or text ([`report`])
//! - **Ports**: the target directory and result store the orchestrator writes
//!   through, with in-memory and PostgreSQL adapters ([`directory`], [`store`])
//!
//! ## Feature Flags
//!
//! - `database`: PostgreSQL result store (SQLx) and its migrations
//! - `postgres-tests`: store tests that need a live database
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fleetscan_core::{
//!     channel::{SshChannel, SshChannelConfig},
//!     directory::InMemoryTargetDirectory,
//!     orchestrator::{OrchestratorConfig, OrchestratorParts, ScanOrchestrator},
//!     payload::PayloadConfig,
//!     store::InMemoryResultStore,
//! };
//! use fleetscan_model::{TargetId, TenantId};
//!
//! async fn scan(tenant: TenantId, targets: &[TargetId]) -> fleetscan_core::Result<()> {
//!     let config = OrchestratorConfig::default();
//!     let parts = OrchestratorParts::new(
//!         Arc::new(InMemoryTargetDirectory::new()),
//!         Arc::new(InMemoryResultStore::new()),
//!         Arc::new(SshChannel::new(SshChannelConfig::default())),
//!     );
//!     let orchestrator =
//!         ScanOrchestrator::new(config.clone(), PayloadConfig::default(), parts);
//!
//!     let accepted = orchestrator
//!         .start_scan(tenant, targets, config.default_options(), "ops@example.com")
//!         .await?;
//!     let run = orchestrator.wait_for_run(tenant, accepted.run_id).await?;
//!     println!("{} finished: {}/{} ok", run.name, run.completed, run.total);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Remote execution and transfer against a single target
pub mod channel;

/// Target directory port and its in-memory adapter
pub mod directory;

/// Error types shared by every component
pub mod error;

/// Run lifecycle notifications
pub mod events;

/// Run scheduling, per-target execution and cancellation
pub mod orchestrator;

/// Scan output parsing
pub mod parser;

/// The program executed on each target
pub mod payload;

/// Statistics, comparisons and trends over recorded runs
pub mod report;

/// Result store port and adapters
pub mod store;

pub use error::{Result, ScanError};
pub use orchestrator::{
    OrchestratorConfig, OrchestratorParts, ScanAccepted, ScanOrchestrator,
    ScanStatusView,
};
pub use report::{ExportFormat, Report, ReportAggregator};
