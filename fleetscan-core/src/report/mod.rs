//! Read-only reporting over recorded runs: consolidated run statistics,
//! run-to-run comparison, and per-target history with a trend verdict.

use std::{collections::HashMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use fleetscan_model::{
    RunId, RunStatus, ScanRun, Severity, SeverityCounts, TargetId,
    TargetResult, TargetStatus, TenantId,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    directory::TargetDirectory,
    error::{Result, ScanError},
    store::ResultStore,
};

pub mod export;

pub use export::{ExportFormat, export};

pub const DEFAULT_HISTORY_LIMIT: u32 = 10;
pub const MAX_HISTORY_LIMIT: u32 = 200;

/// Identity of the run a report was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub error: Option<String>,
}

impl From<&ScanRun> for RunSummary {
    fn from(run: &ScanRun) -> Self {
        Self {
            run_id: run.id,
            name: run.name.clone(),
            status: run.status,
            started_at: run.started_at,
            completed_at: run.completed_at,
            created_by: run.created_by.clone(),
            error: run.error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub total_targets: u32,
    pub successful_scans: u32,
    pub failed_scans: u32,
    /// Targets not started yet, including those skipped by cancellation.
    pub pending_scans: u32,
    pub running_scans: u32,
    /// Successful share of `total_targets`, in percent.
    pub success_rate: f64,
    /// Mean over completed targets only; 0 when none completed.
    pub average_duration_ms: f64,
    pub total_duration_ms: u64,
    pub vulnerabilities: SeverityCounts,
    pub total_vulnerabilities: u64,
}

impl RunStatistics {
    /// Fold a run's results into statistics.
    pub fn compute(run: &ScanRun, results: &[TargetResult]) -> Self {
        let mut successful = 0u32;
        let mut failed = 0u32;
        let mut pending = 0u32;
        let mut running = 0u32;
        let mut timed = 0u64;
        let mut total_duration_ms = 0u64;

        for result in results {
            match result.status {
                TargetStatus::Completed => {
                    successful += 1;
                    if let Some(ms) = result.duration_ms {
                        timed += 1;
                        total_duration_ms = total_duration_ms.saturating_add(ms);
                    }
                }
                TargetStatus::Failed => failed += 1,
                TargetStatus::Pending => pending += 1,
                TargetStatus::Running => running += 1,
            }
        }

        let recorded = u32::try_from(results.len()).unwrap_or(u32::MAX);
        let total_targets = run.total.max(recorded);
        pending += total_targets - recorded;

        let vulnerabilities: SeverityCounts =
            results.iter().map(|result| result.severity).sum();

        Self {
            total_targets,
            successful_scans: successful,
            failed_scans: failed,
            pending_scans: pending,
            running_scans: running,
            success_rate: percentage(successful, total_targets),
            average_duration_ms: if timed == 0 {
                0.0
            } else {
                total_duration_ms as f64 / timed as f64
            },
            total_duration_ms,
            total_vulnerabilities: vulnerabilities.total(),
            vulnerabilities,
        }
    }
}

fn percentage(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        0.0
    } else {
        f64::from(part) / f64::from(whole) * 100.0
    }
}

/// One target's line in a consolidated report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetReportRow {
    pub target_id: TargetId,
    pub target_name: String,
    pub status: TargetStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub vulnerabilities: SeverityCounts,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedReport {
    pub run: RunSummary,
    pub statistics: RunStatistics,
    pub targets: Vec<TargetReportRow>,
    pub summary: String,
    pub generated_at: DateTime<Utc>,
}

/// Signed per-severity change between two runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityDelta {
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

impl SeverityDelta {
    pub fn between(baseline: &SeverityCounts, current: &SeverityCounts) -> Self {
        let diff = |severity| {
            i64::from(current.get(severity)) - i64::from(baseline.get(severity))
        };
        Self {
            critical: diff(Severity::Critical),
            high: diff(Severity::High),
            medium: diff(Severity::Medium),
            low: diff(Severity::Low),
        }
    }

    pub fn get(&self, severity: Severity) -> i64 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }

    pub fn total(&self) -> i64 {
        self.critical + self.high + self.medium + self.low
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportChanges {
    pub vulnerabilities: SeverityDelta,
    pub total_vulnerabilities: i64,
    /// Percentage points, current minus baseline.
    pub success_rate: f64,
    pub failed_scans: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub baseline: RunSummary,
    pub current: RunSummary,
    pub baseline_statistics: RunStatistics,
    pub current_statistics: RunStatistics,
    pub changes: ReportChanges,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Worsening,
    Improving,
    Stable,
    InsufficientData,
}

impl Trend {
    /// Compare vulnerability totals, newest first.
    pub fn from_totals(newest_first: &[u64]) -> Self {
        match newest_first {
            [latest, previous, ..] if latest > previous => Trend::Worsening,
            [latest, previous, ..] if latest < previous => Trend::Improving,
            [_, _, ..] => Trend::Stable,
            _ => Trend::InsufficientData,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Worsening => "worsening",
            Trend::Improving => "improving",
            Trend::Stable => "stable",
            Trend::InsufficientData => "insufficient_data",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One past scan of a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetHistoryEntry {
    pub run_id: RunId,
    pub status: TargetStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub vulnerabilities: SeverityCounts,
    pub total_vulnerabilities: u64,
    pub error: Option<String>,
}

impl From<&TargetResult> for TargetHistoryEntry {
    fn from(result: &TargetResult) -> Self {
        Self {
            run_id: result.run_id,
            status: result.status,
            started_at: result.started_at,
            completed_at: result.completed_at,
            duration_ms: result.duration_ms,
            vulnerabilities: result.severity,
            total_vulnerabilities: result.total_vulnerabilities(),
            error: result.error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerReport {
    pub target_id: TargetId,
    pub target_name: String,
    /// Newest first.
    pub history: Vec<TargetHistoryEntry>,
    pub trend: Trend,
    pub generated_at: DateTime<Utc>,
}

/// Any report the aggregator produces, tagged for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "report_type", rename_all = "snake_case")]
pub enum Report {
    Consolidated(ConsolidatedReport),
    Comparison(ComparisonReport),
    Server(ServerReport),
}

impl From<ConsolidatedReport> for Report {
    fn from(report: ConsolidatedReport) -> Self {
        Report::Consolidated(report)
    }
}

impl From<ComparisonReport> for Report {
    fn from(report: ComparisonReport) -> Self {
        Report::Comparison(report)
    }
}

impl From<ServerReport> for Report {
    fn from(report: ServerReport) -> Self {
        Report::Server(report)
    }
}

/// Builds reports from the result store, with target names from the
/// directory. Never writes.
#[derive(Clone)]
pub struct ReportAggregator {
    store: Arc<dyn ResultStore>,
    directory: Arc<dyn TargetDirectory>,
}

impl fmt::Debug for ReportAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportAggregator")
            .field("store_ptr", &Arc::as_ptr(&self.store))
            .field("directory_ptr", &Arc::as_ptr(&self.directory))
            .finish()
    }
}

impl ReportAggregator {
    pub fn new(
        store: Arc<dyn ResultStore>,
        directory: Arc<dyn TargetDirectory>,
    ) -> Self {
        Self { store, directory }
    }

    pub async fn consolidated_report(
        &self,
        tenant: TenantId,
        run_id: RunId,
    ) -> Result<ConsolidatedReport> {
        let (run, results) = self.load_run(tenant, run_id).await?;
        let names = self.target_names(tenant, &run.target_ids).await?;
        let statistics = RunStatistics::compute(&run, &results);

        let targets: Vec<TargetReportRow> = results
            .iter()
            .map(|result| TargetReportRow {
                target_id: result.target_id,
                target_name: display_name(&names, result.target_id),
                status: result.status,
                started_at: result.started_at,
                completed_at: result.completed_at,
                duration_ms: result.duration_ms,
                vulnerabilities: result.severity,
                error: result.error.clone(),
            })
            .collect();

        let summary = render_summary(&run, &statistics, &targets);
        debug!(
            target: "scan::report",
            run = %run_id,
            targets = targets.len(),
            "consolidated report generated"
        );

        Ok(ConsolidatedReport {
            run: RunSummary::from(&run),
            statistics,
            targets,
            summary,
            generated_at: Utc::now(),
        })
    }

    /// Changes from `baseline` to `current`; positive deltas mean `current`
    /// has more.
    pub async fn comparison_report(
        &self,
        tenant: TenantId,
        baseline: RunId,
        current: RunId,
    ) -> Result<ComparisonReport> {
        let (baseline_run, baseline_results) = self.load_run(tenant, baseline).await?;
        let (current_run, current_results) = self.load_run(tenant, current).await?;
        let before = RunStatistics::compute(&baseline_run, &baseline_results);
        let after = RunStatistics::compute(&current_run, &current_results);

        let vulnerabilities =
            SeverityDelta::between(&before.vulnerabilities, &after.vulnerabilities);
        let changes = ReportChanges {
            total_vulnerabilities: vulnerabilities.total(),
            vulnerabilities,
            success_rate: after.success_rate - before.success_rate,
            failed_scans: i64::from(after.failed_scans) - i64::from(before.failed_scans),
        };
        debug!(
            target: "scan::report",
            baseline = %baseline,
            current = %current,
            critical_delta = changes.vulnerabilities.critical,
            "comparison report generated"
        );

        Ok(ComparisonReport {
            baseline: RunSummary::from(&baseline_run),
            current: RunSummary::from(&current_run),
            baseline_statistics: before,
            current_statistics: after,
            changes,
            generated_at: Utc::now(),
        })
    }

    /// The target's last `limit` results across runs plus a trend verdict
    /// from its two most recent completed scans.
    pub async fn server_report(
        &self,
        tenant: TenantId,
        target_id: TargetId,
        limit: u32,
    ) -> Result<ServerReport> {
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        let target = self
            .directory
            .resolve_by_ids(tenant, &[target_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ScanError::NotFound(format!("target {target_id}")))?;

        let results = self
            .store
            .results_for_target(tenant, target_id, limit)
            .await?;
        let totals: Vec<u64> = results
            .iter()
            .filter(|result| result.status == TargetStatus::Completed)
            .map(TargetResult::total_vulnerabilities)
            .collect();

        Ok(ServerReport {
            target_id,
            target_name: target.name,
            history: results.iter().map(TargetHistoryEntry::from).collect(),
            trend: Trend::from_totals(&totals),
            generated_at: Utc::now(),
        })
    }

    async fn load_run(
        &self,
        tenant: TenantId,
        run_id: RunId,
    ) -> Result<(ScanRun, Vec<TargetResult>)> {
        let run = self
            .store
            .get_run(tenant, run_id)
            .await?
            .ok_or_else(|| ScanError::NotFound(format!("scan run {run_id}")))?;
        let results = self.store.results_for_run(run_id).await?;
        Ok((run, results))
    }

    async fn target_names(
        &self,
        tenant: TenantId,
        ids: &[TargetId],
    ) -> Result<HashMap<TargetId, String>> {
        Ok(self
            .directory
            .resolve_by_ids(tenant, ids)
            .await?
            .into_iter()
            .map(|target| (target.id, target.name))
            .collect())
    }
}

/// Targets that left the directory after the run keep their id as name.
fn display_name(names: &HashMap<TargetId, String>, id: TargetId) -> String {
    names.get(&id).cloned().unwrap_or_else(|| id.to_string())
}

fn render_summary(
    run: &ScanRun,
    stats: &RunStatistics,
    targets: &[TargetReportRow],
) -> String {
    let mut lines = vec![
        format!(
            "Scan \"{}\" is {}: {} of {} targets scanned successfully ({:.1}%), {} failed.",
            run.name,
            run.status,
            stats.successful_scans,
            stats.total_targets,
            stats.success_rate,
            stats.failed_scans,
        ),
        format!(
            "Vulnerabilities: {} critical, {} high, {} medium, {} low ({} total).",
            stats.vulnerabilities.critical,
            stats.vulnerabilities.high,
            stats.vulnerabilities.medium,
            stats.vulnerabilities.low,
            stats.total_vulnerabilities,
        ),
    ];
    if let Some(error) = &run.error {
        lines.push(format!("Run error: {error}"));
    }

    let critical: Vec<&TargetReportRow> = targets
        .iter()
        .filter(|row| row.vulnerabilities.critical > 0)
        .collect();
    if critical.is_empty() {
        lines.push("No target reported critical vulnerabilities.".to_string());
    } else {
        lines.push("Targets with critical vulnerabilities:".to_string());
        for row in critical {
            lines.push(format!(
                "  - {}: {} critical",
                row.target_name, row.vulnerabilities.critical
            ));
        }
    }

    let failed: Vec<&TargetReportRow> = targets
        .iter()
        .filter(|row| row.status == TargetStatus::Failed)
        .collect();
    if !failed.is_empty() {
        lines.push("Failed targets:".to_string());
        for row in failed {
            lines.push(format!(
                "  - {}: {}",
                row.target_name,
                row.error.as_deref().unwrap_or("no error recorded")
            ));
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetscan_model::{ScanOptions, TargetResultId};

    fn run(total: u32) -> ScanRun {
        ScanRun {
            id: RunId::new(),
            tenant: TenantId::new(),
            name: "nightly".into(),
            target_ids: vec![],
            status: RunStatus::Completed,
            total,
            completed: 0,
            failed: 0,
            started_at: Utc::now(),
            completed_at: None,
            options: ScanOptions::default(),
            created_by: "ops".into(),
            error: None,
        }
    }

    fn result(
        run: &ScanRun,
        status: TargetStatus,
        duration_ms: Option<u64>,
        severity: SeverityCounts,
    ) -> TargetResult {
        TargetResult {
            id: TargetResultId::new(),
            run_id: run.id,
            target_id: TargetId::new(),
            tenant: run.tenant,
            status,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            duration_ms,
            severity,
            raw_output: None,
            error: (status == TargetStatus::Failed).then(|| "timeout".to_string()),
        }
    }

    #[test]
    fn durations_only_count_completed_targets() {
        let run = run(4);
        let results = [
            result(&run, TargetStatus::Completed, Some(100), SeverityCounts::new(0, 1, 0, 0)),
            result(&run, TargetStatus::Completed, Some(300), SeverityCounts::default()),
            result(&run, TargetStatus::Failed, Some(10_000), SeverityCounts::default()),
        ];

        let stats = RunStatistics::compute(&run, &results);

        assert_eq!(stats.successful_scans, 2);
        assert_eq!(stats.failed_scans, 1);
        assert_eq!(stats.pending_scans, 1);
        assert_eq!(stats.total_duration_ms, 400);
        assert_eq!(stats.average_duration_ms, 200.0);
        assert_eq!(stats.success_rate, 50.0);
        assert_eq!(stats.vulnerabilities.high, 1);
        assert_eq!(stats.total_vulnerabilities, 1);
    }

    #[test]
    fn empty_run_has_zeroed_rates() {
        let stats = RunStatistics::compute(&run(0), &[]);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.average_duration_ms, 0.0);
    }

    #[test]
    fn trend_compares_two_newest_totals() {
        assert_eq!(Trend::from_totals(&[]), Trend::InsufficientData);
        assert_eq!(Trend::from_totals(&[4]), Trend::InsufficientData);
        assert_eq!(Trend::from_totals(&[5, 3, 9]), Trend::Worsening);
        assert_eq!(Trend::from_totals(&[1, 3]), Trend::Improving);
        assert_eq!(Trend::from_totals(&[2, 2]), Trend::Stable);
    }

    #[test]
    fn summary_calls_out_critical_and_failed_targets() {
        let run = run(2);
        let mut rows = vec![
            TargetReportRow {
                target_id: TargetId::new(),
                target_name: "web-1".into(),
                status: TargetStatus::Completed,
                started_at: Utc::now(),
                completed_at: None,
                duration_ms: Some(50),
                vulnerabilities: SeverityCounts::new(3, 0, 0, 0),
                error: None,
            },
        ];
        rows.push(TargetReportRow {
            target_name: "db-1".into(),
            status: TargetStatus::Failed,
            vulnerabilities: SeverityCounts::default(),
            error: Some("connection test failed: refused".into()),
            ..rows[0].clone()
        });
        let stats = RunStatistics {
            total_targets: 2,
            successful_scans: 1,
            failed_scans: 1,
            pending_scans: 0,
            running_scans: 0,
            success_rate: 50.0,
            average_duration_ms: 50.0,
            total_duration_ms: 50,
            vulnerabilities: SeverityCounts::new(3, 0, 0, 0),
            total_vulnerabilities: 3,
        };

        let summary = render_summary(&run, &stats, &rows);

        assert!(summary.contains("1 of 2 targets scanned successfully (50.0%)"));
        assert!(summary.contains("  - web-1: 3 critical"));
        assert!(summary.contains("  - db-1: connection test failed: refused"));
    }
}
