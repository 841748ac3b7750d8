use std::time::Duration;

use fleetscan_model::ResolvedTarget;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::RemoteChannel;

const HOSTNAME: &str = "hostname";
const OS_RELEASE: &str = ". /etc/os-release && printf '%s\\n' \"$PRETTY_NAME\"";
const KERNEL: &str = "uname -r";
const CPU_COUNT: &str = "nproc";
const MEMORY: &str = "grep MemTotal /proc/meminfo";
const DISK: &str = "df -Pk /";

/// Introspection snapshot of one host. A field is `None` when its probe
/// failed or produced output that could not be read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_total_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_total_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_free_mb: Option<u64>,
}

/// Runs the fixed probe battery one command at a time, keeping whatever
/// succeeds.
pub async fn collect<C>(
    channel: &C,
    target: &ResolvedTarget,
    timeout: Duration,
) -> HostInfo
where
    C: RemoteChannel + ?Sized,
{
    let mut info = HostInfo {
        hostname: probe(channel, target, HOSTNAME, timeout)
            .await
            .and_then(first_line),
        os: probe(channel, target, OS_RELEASE, timeout)
            .await
            .and_then(first_line),
        kernel: probe(channel, target, KERNEL, timeout)
            .await
            .and_then(first_line),
        cpu_count: probe(channel, target, CPU_COUNT, timeout)
            .await
            .and_then(|out| out.trim().parse().ok()),
        memory_total_mb: probe(channel, target, MEMORY, timeout)
            .await
            .and_then(|out| parse_meminfo_kb(&out))
            .map(|kb| kb / 1024),
        ..HostInfo::default()
    };

    if let Some((total_kb, free_kb)) = probe(channel, target, DISK, timeout)
        .await
        .and_then(|out| parse_df(&out))
    {
        info.disk_total_mb = Some(total_kb / 1024);
        info.disk_free_mb = Some(free_kb / 1024);
    }

    info
}

async fn probe<C>(
    channel: &C,
    target: &ResolvedTarget,
    command: &str,
    timeout: Duration,
) -> Option<String>
where
    C: RemoteChannel + ?Sized,
{
    let output = channel.execute(target, command, timeout).await;
    if output.success {
        Some(output.stdout)
    } else {
        debug!(
            target: "scan::channel",
            host = %target.host,
            command,
            error = %output.error_message(),
            "host info probe failed; omitting field"
        );
        None
    }
}

fn first_line(output: String) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

fn parse_meminfo_kb(output: &str) -> Option<u64> {
    // MemTotal:       16318412 kB
    output
        .lines()
        .find(|line| line.starts_with("MemTotal"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

fn parse_df(output: &str) -> Option<(u64, u64)> {
    // Filesystem 1024-blocks Used Available Capacity Mounted on
    let row = output.lines().nth(1)?;
    let columns: Vec<&str> = row.split_whitespace().collect();
    let total = columns.get(1)?.parse().ok()?;
    let available = columns.get(3)?.parse().ok()?;
    Some((total, available))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ExecOutput, FailureKind, MockRemoteChannel};
    use fleetscan_model::TargetId;

    fn target() -> ResolvedTarget {
        ResolvedTarget {
            id: TargetId::new(),
            name: "web-01".into(),
            host: "10.0.0.5".into(),
            port: 22,
            username: "scan".into(),
            credential_ref: None,
            tags: vec![],
        }
    }

    fn ok(stdout: &str) -> ExecOutput {
        ExecOutput {
            success: true,
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
            duration: Duration::from_millis(3),
            failure: None,
        }
    }

    #[tokio::test]
    async fn failed_probes_only_omit_their_field() {
        let mut channel = MockRemoteChannel::new();
        channel.expect_execute().returning(|_, command, _| match command {
            HOSTNAME => ok("web-01\n"),
            KERNEL => ok("6.8.0-31-generic\n"),
            CPU_COUNT => ok("8\n"),
            MEMORY => ok("MemTotal:       16318412 kB\n"),
            DISK => ExecOutput::failed(
                Duration::from_secs(1),
                FailureKind::Timeout,
                "",
            ),
            _ => ExecOutput {
                success: false,
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "no such file".into(),
                duration: Duration::from_millis(1),
                failure: Some(FailureKind::NonZeroExit),
            },
        });

        let info = collect(&channel, &target(), Duration::from_secs(5)).await;

        assert_eq!(info.hostname.as_deref(), Some("web-01"));
        assert_eq!(info.os, None);
        assert_eq!(info.kernel.as_deref(), Some("6.8.0-31-generic"));
        assert_eq!(info.cpu_count, Some(8));
        assert_eq!(info.memory_total_mb, Some(15935));
        assert_eq!(info.disk_total_mb, None);
        assert_eq!(info.disk_free_mb, None);
    }

    #[tokio::test]
    async fn unparseable_numbers_are_dropped() {
        let mut channel = MockRemoteChannel::new();
        channel.expect_execute().returning(|_, command, _| match command {
            CPU_COUNT => ok("eight\n"),
            DISK => ok(
                "Filesystem 1024-blocks Used Available Capacity Mounted on\n\
                 /dev/sda1 41152736 20576368 18464892 53% /\n",
            ),
            _ => ok(""),
        });

        let info = collect(&channel, &target(), Duration::from_secs(5)).await;

        assert_eq!(info.hostname, None);
        assert_eq!(info.cpu_count, None);
        assert_eq!(info.disk_total_mb, Some(40188));
        assert_eq!(info.disk_free_mb, Some(18032));
    }
}
