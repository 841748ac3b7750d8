//! Report serialization. Pure: formats what the report already holds.

use std::{fmt, fmt::Write as _, str::FromStr};

use fleetscan_model::{Severity, SeverityCounts};
use serde::{Deserialize, Serialize};

use super::{ComparisonReport, ConsolidatedReport, Report, ServerReport};
use crate::error::{Result, ScanError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Text,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Text => "text",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Text => "txt",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "text" | "txt" => Ok(ExportFormat::Text),
            other => Err(ScanError::Validation(format!(
                "unsupported export format '{other}' (expected json, csv or text)"
            ))),
        }
    }
}

/// Render `report` in `format`.
pub fn export(report: &Report, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        ExportFormat::Csv => Ok(match report {
            Report::Consolidated(r) => consolidated_csv(r),
            Report::Comparison(r) => comparison_csv(r),
            Report::Server(r) => server_csv(r),
        }),
        ExportFormat::Text => Ok(match report {
            Report::Consolidated(r) => consolidated_text(r),
            Report::Comparison(r) => comparison_text(r),
            Report::Server(r) => server_text(r),
        }),
    }
}

/// Quote a CSV field when it carries a separator, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn severity_columns(counts: &SeverityCounts) -> String {
    Severity::ALL
        .iter()
        .map(|severity| counts.get(*severity).to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn consolidated_csv(report: &ConsolidatedReport) -> String {
    let mut out = String::from(
        "target_id,target_name,status,duration_ms,critical,high,medium,low,error\n",
    );
    for row in &report.targets {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{}",
            row.target_id,
            csv_field(&row.target_name),
            row.status,
            optional(row.duration_ms),
            severity_columns(&row.vulnerabilities),
            csv_field(row.error.as_deref().unwrap_or_default()),
        );
    }
    out
}

fn comparison_csv(report: &ComparisonReport) -> String {
    let before = &report.baseline_statistics;
    let after = &report.current_statistics;
    let changes = &report.changes;

    let mut out = String::from("metric,baseline,current,change\n");
    for severity in Severity::ALL {
        let _ = writeln!(
            out,
            "{},{},{},{}",
            severity.label().to_ascii_lowercase(),
            before.vulnerabilities.get(severity),
            after.vulnerabilities.get(severity),
            changes.vulnerabilities.get(severity),
        );
    }
    let _ = writeln!(
        out,
        "total_vulnerabilities,{},{},{}",
        before.total_vulnerabilities, after.total_vulnerabilities, changes.total_vulnerabilities
    );
    let _ = writeln!(
        out,
        "success_rate,{:.2},{:.2},{:.2}",
        before.success_rate, after.success_rate, changes.success_rate
    );
    let _ = writeln!(
        out,
        "failed_scans,{},{},{}",
        before.failed_scans, after.failed_scans, changes.failed_scans
    );
    out
}

fn server_csv(report: &ServerReport) -> String {
    let mut out = String::from(
        "run_id,status,started_at,completed_at,duration_ms,critical,high,medium,low,total,error\n",
    );
    for entry in &report.history {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{}",
            entry.run_id,
            entry.status,
            entry.started_at.to_rfc3339(),
            optional(entry.completed_at.map(|at| at.to_rfc3339())),
            optional(entry.duration_ms),
            severity_columns(&entry.vulnerabilities),
            entry.total_vulnerabilities,
            csv_field(entry.error.as_deref().unwrap_or_default()),
        );
    }
    out
}

fn consolidated_text(report: &ConsolidatedReport) -> String {
    let stats = &report.statistics;
    let mut out = String::new();
    let _ = writeln!(out, "Consolidated report: {} ({})", report.run.name, report.run.run_id);
    let _ = writeln!(out, "Generated: {}", report.generated_at.to_rfc3339());
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", report.summary);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Durations: {:.0} ms average, {} ms total over completed targets",
        stats.average_duration_ms, stats.total_duration_ms
    );
    if stats.pending_scans > 0 || stats.running_scans > 0 {
        let _ = writeln!(
            out,
            "Not finished: {} pending, {} running",
            stats.pending_scans, stats.running_scans
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<32} {:<10} {:>10} {:>5} {:>5} {:>5} {:>5}",
        "TARGET", "STATUS", "DURATION", "CRIT", "HIGH", "MED", "LOW"
    );
    for row in &report.targets {
        let _ = writeln!(
            out,
            "{:<32} {:<10} {:>10} {:>5} {:>5} {:>5} {:>5}",
            row.target_name,
            row.status.as_str(),
            row.duration_ms.map(|ms| format!("{ms}ms")).unwrap_or_else(|| "-".into()),
            row.vulnerabilities.critical,
            row.vulnerabilities.high,
            row.vulnerabilities.medium,
            row.vulnerabilities.low,
        );
    }
    out
}

fn signed(value: i64) -> String {
    if value > 0 {
        format!("+{value}")
    } else {
        value.to_string()
    }
}

fn comparison_text(report: &ComparisonReport) -> String {
    let changes = &report.changes;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Comparison: {} ({}) -> {} ({})",
        report.baseline.name, report.baseline.run_id, report.current.name, report.current.run_id
    );
    let _ = writeln!(out, "Generated: {}", report.generated_at.to_rfc3339());
    let _ = writeln!(out);
    for severity in Severity::ALL {
        let _ = writeln!(
            out,
            "{:<9} {:>6} -> {:<6} ({})",
            severity.label(),
            report.baseline_statistics.vulnerabilities.get(severity),
            report.current_statistics.vulnerabilities.get(severity),
            signed(changes.vulnerabilities.get(severity)),
        );
    }
    let _ = writeln!(
        out,
        "Total vulnerabilities: {}",
        signed(changes.total_vulnerabilities)
    );
    let _ = writeln!(
        out,
        "Success rate: {:.1}% -> {:.1}% ({:+.1} points)",
        report.baseline_statistics.success_rate,
        report.current_statistics.success_rate,
        changes.success_rate
    );
    let _ = writeln!(out, "Failed scans: {}", signed(changes.failed_scans));
    out
}

fn server_text(report: &ServerReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Target report: {} ({})", report.target_name, report.target_id);
    let _ = writeln!(out, "Trend: {}", report.trend);
    let _ = writeln!(out, "Generated: {}", report.generated_at.to_rfc3339());
    let _ = writeln!(out);
    if report.history.is_empty() {
        let _ = writeln!(out, "No scans recorded for this target.");
        return out;
    }
    for entry in &report.history {
        let detail = match &entry.error {
            Some(error) => format!("error: {error}"),
            None => format!(
                "{} critical, {} high, {} medium, {} low",
                entry.vulnerabilities.critical,
                entry.vulnerabilities.high,
                entry.vulnerabilities.medium,
                entry.vulnerabilities.low
            ),
        };
        let _ = writeln!(
            out,
            "{}  {:<9}  {}",
            entry.started_at.format("%Y-%m-%d %H:%M:%S"),
            entry.status.as_str(),
            detail
        );
    }
    out
}
