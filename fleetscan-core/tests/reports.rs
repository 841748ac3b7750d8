mod support;

use std::time::Duration;

use anyhow::Result;
use fleetscan_core::{
    ExportFormat, Report, ScanError,
    report::{Trend, export},
};
use fleetscan_model::{RunStatus, TargetId, TargetStatus, TenantId};
use support::{FakeChannel, Fleet, Script};

#[tokio::test]
async fn consolidated_report_for_a_partially_failed_run() -> Result<()> {
    let channel = FakeChannel::new(Script::ok(""))
        .script("t1", Script::slow(100, "Critical: 0\nHigh: 1\n"))
        .script("t2", Script::TimeOut { after: Duration::from_millis(20) })
        .script("t3", Script::ok("no findings\n"));
    let fleet = Fleet::new(&["t1", "t2", "t3"], channel);

    let run = fleet.scan(2).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!((run.total, run.completed, run.failed), (3, 2, 1));

    let report = fleet.reports.consolidated_report(fleet.tenant, run.id).await?;
    let stats = &report.statistics;
    assert_eq!(stats.total_targets, 3);
    assert_eq!(stats.successful_scans, 2);
    assert_eq!(stats.failed_scans, 1);
    assert_eq!(stats.vulnerabilities.high, 1);
    assert_eq!(stats.vulnerabilities.critical, 0);
    assert!(stats.average_duration_ms > 0.0);
    assert!((stats.success_rate - 200.0 / 3.0).abs() < 1e-9);

    let t1 = report
        .targets
        .iter()
        .find(|row| row.target_name == "t1")
        .expect("t1 row");
    assert!(t1.duration_ms.unwrap_or_default() >= 100);

    // Only completed targets count towards durations.
    let completed_total: u64 = report
        .targets
        .iter()
        .filter(|row| row.status == TargetStatus::Completed)
        .filter_map(|row| row.duration_ms)
        .sum();
    assert_eq!(stats.total_duration_ms, completed_total);
    assert_eq!(stats.average_duration_ms, completed_total as f64 / 2.0);

    assert!(report.summary.contains("No target reported critical vulnerabilities."));
    assert!(report.summary.contains("  - t2: connection test failed:"));
    Ok(())
}

#[tokio::test]
async fn summary_names_targets_with_critical_findings() -> Result<()> {
    let channel = FakeChannel::new(Script::ok("Low: 3"))
        .script("edge-1", Script::ok("Critical: 4"));
    let fleet = Fleet::new(&["edge-1", "edge-2"], channel);

    let run = fleet.scan(2).await;
    let report = fleet.reports.consolidated_report(fleet.tenant, run.id).await?;

    assert!(report.summary.contains("Targets with critical vulnerabilities:"));
    assert!(report.summary.contains("  - edge-1: 4 critical"));
    assert!(!report.summary.contains("edge-2: "));
    assert!(!report.summary.contains("Failed targets:"));
    Ok(())
}

#[tokio::test]
async fn comparison_reports_severity_deltas() -> Result<()> {
    let channel = FakeChannel::new(Script::ok("Critical: 2\nMedium: 4"));
    let fleet = Fleet::new(&["app"], channel);

    let baseline = fleet.scan(1).await;
    fleet
        .channel
        .set_script("app", Script::ok("Critical: 5\nMedium: 1"));
    let current = fleet.scan(1).await;

    let report = fleet
        .reports
        .comparison_report(fleet.tenant, baseline.id, current.id)
        .await?;

    assert_eq!(report.changes.vulnerabilities.critical, 3);
    assert_eq!(report.changes.vulnerabilities.medium, -3);
    assert_eq!(report.changes.vulnerabilities.high, 0);
    assert_eq!(report.changes.total_vulnerabilities, 0);
    assert_eq!(report.changes.success_rate, 0.0);

    let csv = export(&Report::from(report), ExportFormat::Csv)?;
    assert!(csv.lines().any(|line| line == "critical,2,5,3"));
    assert!(csv.lines().any(|line| line == "medium,4,1,-3"));
    Ok(())
}

#[tokio::test]
async fn server_report_trend_follows_latest_two_scans() -> Result<()> {
    let channel = FakeChannel::new(Script::ok("High: 1"));
    let fleet = Fleet::new(&["db"], channel);
    let db = fleet.id_of("db");

    fleet.scan(1).await;
    let single = fleet.reports.server_report(fleet.tenant, db, 10).await?;
    assert_eq!(single.history.len(), 1);
    assert_eq!(single.trend, Trend::InsufficientData);

    tokio::time::sleep(Duration::from_millis(5)).await;
    fleet.channel.set_script("db", Script::ok("High: 1\nCritical: 1"));
    fleet.scan(1).await;
    let worse = fleet.reports.server_report(fleet.tenant, db, 10).await?;
    assert_eq!(worse.history.len(), 2);
    assert_eq!(worse.history[0].total_vulnerabilities, 2);
    assert_eq!(worse.trend, Trend::Worsening);

    tokio::time::sleep(Duration::from_millis(5)).await;
    fleet.channel.set_script("db", Script::ok(""));
    fleet.scan(1).await;
    let better = fleet.reports.server_report(fleet.tenant, db, 2).await?;
    assert_eq!(better.history.len(), 2);
    assert_eq!(better.trend, Trend::Improving);

    let text = export(&Report::from(better), ExportFormat::Text)?;
    assert!(text.contains("Trend: improving"));
    Ok(())
}

#[tokio::test]
async fn failed_scans_are_skipped_by_the_trend() -> Result<()> {
    let channel = FakeChannel::new(Script::ok("High: 1"));
    let fleet = Fleet::new(&["db"], channel);
    let db = fleet.id_of("db");

    fleet.scan(1).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    fleet.channel.set_script("db", Script::ok("High: 3"));
    fleet.scan(1).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    fleet.channel.set_script("db", Script::Refuse);
    fleet.scan(1).await;

    let report = fleet.reports.server_report(fleet.tenant, db, 10).await?;
    assert_eq!(report.history.len(), 3);
    assert_eq!(report.history[0].status, TargetStatus::Failed);
    assert_eq!(report.trend, Trend::Worsening);
    Ok(())
}

#[tokio::test]
async fn reports_are_tenant_scoped() -> Result<()> {
    let fleet = Fleet::new(&["a"], FakeChannel::new(Script::ok("")));
    let run = fleet.scan(1).await;
    let stranger = TenantId::new();

    let consolidated = fleet.reports.consolidated_report(stranger, run.id).await;
    assert!(matches!(consolidated, Err(ScanError::NotFound(_))));

    let comparison = fleet
        .reports
        .comparison_report(fleet.tenant, run.id, fleet_scan_of_other_tenant().await)
        .await;
    assert!(matches!(comparison, Err(ScanError::NotFound(_))));

    let server = fleet.reports.server_report(fleet.tenant, TargetId::new(), 5).await;
    assert!(matches!(server, Err(ScanError::NotFound(_))));
    Ok(())
}

async fn fleet_scan_of_other_tenant() -> fleetscan_model::RunId {
    let other = Fleet::new(&["z"], FakeChannel::new(Script::ok("")));
    other.scan(1).await.id
}

#[tokio::test]
async fn json_export_round_trips_the_run_identity() -> Result<()> {
    let fleet = Fleet::new(&["a", "b"], FakeChannel::new(Script::ok("Low: 2")));
    let run = fleet.scan(2).await;
    let report = fleet.reports.consolidated_report(fleet.tenant, run.id).await?;

    let json = export(&Report::from(report.clone()), ExportFormat::Json)?;
    let parsed: Report = serde_json::from_str(&json)?;
    assert_eq!(parsed, Report::Consolidated(report));
    Ok(())
}
