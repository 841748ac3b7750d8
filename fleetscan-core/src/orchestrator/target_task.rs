use std::{sync::Arc, time::Instant};

use chrono::Utc;
use fleetscan_model::{
    ResolvedTarget, RunId, TargetHealth, TargetId, TargetResult, TargetStatus,
    TenantId,
};
use tracing::{debug, info, warn};

use super::OrchestratorInner;
use crate::channel::ExecOutput;

/// Everything a per-target task needs to know about its run.
#[derive(Debug)]
pub(super) struct RunTicket {
    pub run_id: RunId,
    pub tenant: TenantId,
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct TargetOutcome {
    pub target_id: TargetId,
    pub succeeded: bool,
}

/// Why the payload could not produce output for a target.
struct PayloadFailure {
    message: String,
    health: TargetHealth,
    output: Option<String>,
}

impl PayloadFailure {
    fn unreachable(message: String) -> Self {
        Self {
            message,
            health: TargetHealth::Offline,
            output: None,
        }
    }

    fn errored(message: String, output: Option<String>) -> Self {
        Self {
            message,
            health: TargetHealth::Error,
            output,
        }
    }
}

/// Remote output is arbitrary bytes; NUL cannot be stored in a text column.
fn without_nul(text: String) -> String {
    if text.contains('\0') {
        text.replace('\0', "\u{FFFD}")
    } else {
        text
    }
}

impl OrchestratorInner {
    /// Scan one target end to end. Never fails: every problem ends up on the
    /// target's result record.
    pub(super) async fn scan_target(
        self: Arc<Self>,
        ticket: Arc<RunTicket>,
        target: ResolvedTarget,
    ) -> TargetOutcome {
        let clock = Instant::now();
        let mut result =
            TargetResult::pending(ticket.run_id, target.id, ticket.tenant);
        self.persist_new_result(&result).await;

        result.status = TargetStatus::Running;
        result.started_at = Utc::now();
        self.persist_result(&result).await;

        let outcome = self.run_payload(&ticket, &target).await;

        result.completed_at = Some(Utc::now());
        result.duration_ms =
            Some(u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX));

        let health = match outcome {
            Ok(output) => {
                result.status = TargetStatus::Completed;
                result.severity = self.parser.parse(&output.stdout);
                result.raw_output = Some(without_nul(output.stdout));
                info!(
                    target: "scan::orchestrator",
                    run = %ticket.run_id,
                    target_name = %target.name,
                    duration_ms = result.duration_ms,
                    critical = result.severity.critical,
                    high = result.severity.high,
                    "target scan completed"
                );
                TargetHealth::Online
            }
            Err(failure) => {
                result.status = TargetStatus::Failed;
                result.raw_output = failure.output.map(without_nul);
                warn!(
                    target: "scan::orchestrator",
                    run = %ticket.run_id,
                    target_name = %target.name,
                    error = %failure.message,
                    "target scan failed"
                );
                result.error = Some(without_nul(failure.message));
                failure.health
            }
        };

        self.persist_result(&result).await;
        self.record_health(ticket.tenant, target.id, health).await;

        TargetOutcome {
            target_id: target.id,
            succeeded: result.status == TargetStatus::Completed,
        }
    }

    async fn run_payload(
        &self,
        ticket: &RunTicket,
        target: &ResolvedTarget,
    ) -> Result<ExecOutput, PayloadFailure> {
        let probe = self
            .channel
            .test_connection(target, self.config.connect_timeout())
            .await;
        if !probe.success {
            let reason = probe
                .error
                .or_else(|| probe.failure.map(|kind| kind.to_string()))
                .unwrap_or_else(|| "connection failed".to_string());
            return Err(PayloadFailure::unreachable(format!(
                "connection test failed: {reason}"
            )));
        }
        debug!(
            target: "scan::channel",
            target_name = %target.name,
            elapsed_ms = probe.duration.as_millis() as u64,
            "connection test passed"
        );

        if let Some(script) = &self.payload.local_script {
            let transfer = self
                .channel
                .copy_to(
                    target,
                    script,
                    &self.payload.remote_path,
                    self.config.transfer_timeout(),
                )
                .await;
            if !transfer.success {
                let reason = transfer
                    .error
                    .unwrap_or_else(|| "transfer failed".to_string());
                return Err(PayloadFailure::errored(
                    format!("payload upload failed: {reason}"),
                    None,
                ));
            }
        }

        let output = self
            .channel
            .execute(target, &ticket.command, self.config.execute_timeout())
            .await;
        if !output.success {
            let captured = (!output.stdout.is_empty()).then(|| output.stdout.clone());
            return Err(PayloadFailure::errored(output.error_message(), captured));
        }
        Ok(output)
    }

    async fn persist_new_result(&self, result: &TargetResult) {
        if let Err(err) = self.store.insert_result(result).await {
            warn!(
                target: "scan::orchestrator",
                run = %result.run_id,
                target_id = %result.target_id,
                error = %err,
                "failed to record target result"
            );
        }
    }

    async fn persist_result(&self, result: &TargetResult) {
        if let Err(err) = self.store.update_result(result).await {
            warn!(
                target: "scan::orchestrator",
                run = %result.run_id,
                target_id = %result.target_id,
                status = %result.status,
                error = %err,
                "failed to update target result"
            );
        }
    }

    async fn record_health(
        &self,
        tenant: TenantId,
        target_id: TargetId,
        health: TargetHealth,
    ) {
        if let Err(err) = self
            .directory
            .update_last_status(tenant, target_id, health, Utc::now())
            .await
        {
            warn!(
                target: "scan::orchestrator",
                target_id = %target_id,
                status = %health,
                error = %err,
                "failed to update target status"
            );
        }
    }
}
