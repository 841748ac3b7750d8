use std::{fs, path::Path, time::Duration};

use anyhow::{Context as _, anyhow};
use fleetscan_core::{
    Report, ScanStatusView,
    channel::RemoteChannel,
    events::RunEvent,
    report::export,
    store::RunQuery,
};
use fleetscan_config::find_target;
use fleetscan_model::{RunId, ScanRun};
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    cli::{ListArgs, OutputArgs, ProbeArgs, ReportKind, ScanArgs},
    context::AppContext,
};

pub async fn scan(ctx: &AppContext, args: ScanArgs, json: bool) -> anyhow::Result<()> {
    let targets = ctx.select_targets(&args.targets)?;
    let ids: Vec<_> = targets.iter().map(|t| t.id).collect();

    let mut options = ctx.orchestrator.config().default_options().quick(args.quick);
    if let Some(parallelism) = args.parallelism {
        options = options.with_parallelism(parallelism);
    }
    let parallelism = options.parallelism;
    if let Some(name) = args.name {
        options = options.named(name);
    }

    let accepted = ctx
        .orchestrator
        .start_scan(ctx.tenant, &ids, options, &args.requested_by)
        .await?;
    let mut events = ctx.orchestrator.subscribe(accepted.run_id);

    if !json {
        println!(
            "run {} started: {} targets, parallelism {}",
            accepted.run_id,
            accepted.total_targets,
            parallelism
        );
    }

    let progress = async {
        while let Some(event) = events.recv().await {
            if !json && let RunEvent::Progress { completed, failed, total, .. } = event {
                println!("  progress: {}/{} done, {} failed", completed + failed, total, failed);
            }
        }
    };
    let wait = ctx.orchestrator.wait_for_run(ctx.tenant, accepted.run_id);
    tokio::pin!(wait);

    // The driver may finish before the subscription exists, so completion is
    // driven by the run task rather than by the event feed.
    let run = tokio::select! {
        run = &mut wait => run?,
        () = progress => (&mut wait).await?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!(target: "scan::cli", run = %accepted.run_id, "interrupt received, cancelling run");
            if let Err(err) = ctx.orchestrator.cancel_scan(ctx.tenant, accepted.run_id).await {
                warn!(target: "scan::cli", error = %err, "cancel after interrupt failed");
            }
            (&mut wait).await?
        }
    };
    let view = ctx
        .orchestrator
        .get_scan_status(ctx.tenant, run.id)
        .await?;
    print_value(&view, json, |view| render_status(ctx, view))
}

pub async fn status(ctx: &AppContext, run_id: RunId, json: bool) -> anyhow::Result<()> {
    ctx.require_database("status")?;
    let view = ctx.orchestrator.get_scan_status(ctx.tenant, run_id).await?;
    print_value(&view, json, |view| render_status(ctx, view))
}

pub async fn list(ctx: &AppContext, args: ListArgs, json: bool) -> anyhow::Result<()> {
    ctx.require_database("list")?;
    let mut query = RunQuery::default().page(args.limit, args.offset);
    if let Some(status) = args.status {
        query = query.with_status(status.into());
    }
    let runs = ctx.orchestrator.list_scans(ctx.tenant, query).await?;
    print_value(&runs, json, |runs| {
        if runs.is_empty() {
            return "no runs".to_string();
        }
        runs.iter().map(run_line).collect::<Vec<_>>().join("\n")
    })
}

pub async fn cancel(ctx: &AppContext, run_id: RunId, json: bool) -> anyhow::Result<()> {
    ctx.require_database("cancel")?;
    let run = ctx.orchestrator.cancel_scan(ctx.tenant, run_id).await?;
    print_value(&run, json, |run| {
        format!(
            "run {} cancelled after {}/{} targets",
            run.id,
            run.processed(),
            run.total
        )
    })
}

pub async fn report(ctx: &AppContext, kind: ReportKind) -> anyhow::Result<()> {
    ctx.require_database("report")?;
    let (report, output): (Report, OutputArgs) = match kind {
        ReportKind::Consolidated { run_id, output } => (
            ctx.reports
                .consolidated_report(ctx.tenant, run_id)
                .await?
                .into(),
            output,
        ),
        ReportKind::Compare {
            baseline,
            current,
            output,
        } => (
            ctx.reports
                .comparison_report(ctx.tenant, baseline, current)
                .await?
                .into(),
            output,
        ),
        ReportKind::Server {
            target,
            limit,
            output,
        } => {
            let target = find_target(&ctx.targets, &target)
                .ok_or_else(|| anyhow!("no inventory target named or with id '{target}'"))?;
            (
                ctx.reports
                    .server_report(ctx.tenant, target.id, limit)
                    .await?
                    .into(),
                output,
            )
        }
    };

    let rendered = export(&report, output.format)?;
    match output.output {
        Some(path) => write_report(&path, &rendered),
        None => {
            println!("{rendered}");
            Ok(())
        }
    }
}

#[derive(Debug, Serialize)]
struct ProbeOutcome {
    target: String,
    reachable: bool,
    latency_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<fleetscan_core::channel::HostInfo>,
}

pub async fn probe(ctx: &AppContext, args: ProbeArgs, json: bool) -> anyhow::Result<()> {
    let targets = ctx.select_targets(&args.targets)?;
    let connect_only = args.connect_only;
    let connect_timeout = args
        .timeout
        .unwrap_or_else(|| ctx.config.orchestrator.connect_timeout());
    let info_timeout = args
        .timeout
        .unwrap_or_else(|| ctx.config.orchestrator.info_timeout());

    let outcomes = join_all(targets.iter().map(|target| async move {
        let resolved = target.resolved();
        let probe = ctx
            .channel
            .test_connection(&resolved, connect_timeout)
            .await;
        let host = if probe.success && !connect_only {
            Some(ctx.channel.get_info(&resolved, info_timeout).await)
        } else {
            None
        };
        ProbeOutcome {
            target: target.name.clone(),
            reachable: probe.success,
            latency_ms: probe.duration.as_millis(),
            error: probe.error,
            host,
        }
    }))
    .await;

    let unreachable = outcomes.iter().filter(|o| !o.reachable).count();
    print_value(&outcomes, json, |outcomes| {
        outcomes.iter().map(probe_line).collect::<Vec<_>>().join("\n")
    })?;
    if unreachable > 0 {
        return Err(anyhow!("{unreachable} of {} targets unreachable", outcomes.len()));
    }
    Ok(())
}

pub async fn reconcile(ctx: &AppContext, json: bool) -> anyhow::Result<()> {
    ctx.require_database("reconcile")?;
    let closed = ctx.orchestrator.reconcile_stale_runs().await?;
    print_value(&closed, json, |closed| format!("closed {closed} stale runs"))
}

fn print_value<T: Serialize>(
    value: &T,
    json: bool,
    text: impl FnOnce(&T) -> String,
) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text(value));
    }
    Ok(())
}

fn write_report(path: &Path, rendered: &str) -> anyhow::Result<()> {
    fs::write(path, rendered)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    info!(target: "scan::cli", path = %path.display(), "report written");
    Ok(())
}

fn run_line(run: &ScanRun) -> String {
    format!(
        "{}  {:<9}  {}/{} ok, {} failed  {}  {}",
        run.id,
        run.status.to_string(),
        run.completed,
        run.total,
        run.failed,
        run.started_at.format("%Y-%m-%d %H:%M"),
        run.name
    )
}

fn render_status(ctx: &AppContext, view: &ScanStatusView) -> String {
    let mut lines = vec![run_line(&view.run)];
    if let Some(error) = &view.run.error {
        lines.push(format!("error: {error}"));
    }
    for result in &view.results {
        let name = ctx
            .targets
            .iter()
            .find(|t| t.id == result.target_id)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| result.target_id.to_string());
        let severity = &result.severity;
        let mut line = format!(
            "  {:<24} {:<9} C{} H{} M{} L{}",
            name,
            result.status.to_string(),
            severity.critical,
            severity.high,
            severity.medium,
            severity.low
        );
        if let Some(ms) = result.duration_ms {
            line.push_str(&format!(
                "  {}",
                humantime::format_duration(Duration::from_millis(ms))
            ));
        }
        if let Some(error) = &result.error {
            line.push_str(&format!("  ({error})"));
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn probe_line(outcome: &ProbeOutcome) -> String {
    if !outcome.reachable {
        return format!(
            "{:<24} unreachable  {}",
            outcome.target,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    let mut line = format!("{:<24} ok  {}ms", outcome.target, outcome.latency_ms);
    if let Some(host) = &outcome.host {
        if let Some(os) = &host.os {
            line.push_str(&format!("  {os}"));
        }
        if let Some(cpus) = host.cpu_count {
            line.push_str(&format!("  {cpus} cpu"));
        }
        if let Some(mem) = host.memory_total_mb {
            line.push_str(&format!("  {mem} MiB"));
        }
    }
    line
}
