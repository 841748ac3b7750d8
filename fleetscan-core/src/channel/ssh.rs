use std::{
    io,
    path::Path,
    process::Stdio,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use fleetscan_model::ResolvedTarget;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{
    ConnectionProbe, ExecOutput, FailureKind, RemoteChannel, TransferOutcome,
};

/// Exit status OpenSSH reserves for its own connection/auth errors.
const SSH_ERROR_STATUS: i32 = 255;

/// Settings for the OpenSSH-backed channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshChannelConfig {
    /// Path or name of the `ssh` client.
    pub ssh_program: String,
    /// Path or name of the `scp` client.
    pub scp_program: String,
    /// When false, unknown host keys are accepted on first contact.
    pub strict_host_key_checking: bool,
    /// Extra `-o` options, e.g. `ServerAliveInterval=15`.
    pub extra_options: Vec<String>,
}

impl Default for SshChannelConfig {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
            strict_host_key_checking: true,
            extra_options: Vec::new(),
        }
    }
}

/// Connectivity channel that shells out to the OpenSSH client tools.
///
/// Each call spawns its own process with `kill_on_drop`, so a timeout drops
/// the pending wait and the child is killed with it.
#[derive(Debug, Clone, Default)]
pub struct SshChannel {
    config: SshChannelConfig,
}

enum ProcessOutcome {
    Finished {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    TimedOut,
    LaunchFailed(io::Error),
}

impl SshChannel {
    pub fn new(config: SshChannelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SshChannelConfig {
        &self.config
    }

    fn common_options(
        &self,
        cmd: &mut Command,
        target: &ResolvedTarget,
        timeout: Duration,
    ) {
        // ssh only understands whole seconds and treats 0 as "no timeout".
        let connect_secs = timeout.as_secs().max(1);
        let host_key_policy = if self.config.strict_host_key_checking {
            "yes"
        } else {
            "accept-new"
        };

        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={connect_secs}"))
            .arg("-o")
            .arg(format!("StrictHostKeyChecking={host_key_policy}"));

        for option in &self.config.extra_options {
            cmd.arg("-o").arg(option);
        }

        if let Some(identity) = target.credential_ref.as_deref() {
            cmd.arg("-i").arg(identity);
        }
    }

    fn ssh_command(
        &self,
        target: &ResolvedTarget,
        remote_command: &str,
        timeout: Duration,
    ) -> Command {
        let mut cmd = Command::new(&self.config.ssh_program);
        self.common_options(&mut cmd, target, timeout);
        cmd.arg("-p")
            .arg(target.port.to_string())
            .arg(target.destination())
            .arg("--")
            .arg(remote_command);
        cmd
    }

    fn scp_command(
        &self,
        target: &ResolvedTarget,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> Command {
        let mut cmd = Command::new(&self.config.scp_program);
        cmd.arg("-q");
        self.common_options(&mut cmd, target, timeout);
        cmd.arg("-P")
            .arg(target.port.to_string())
            .arg(source)
            .arg(destination);
        cmd
    }

    /// `user@host:path` for scp. IPv6 literals are bracketed, otherwise scp
    /// splits the host at its first colon.
    fn remote_spec(target: &ResolvedTarget, remote_path: &str) -> String {
        let host = if target.host.contains(':') && !target.host.starts_with('[') {
            format!("[{}]", target.host)
        } else {
            target.host.clone()
        };
        if target.username.is_empty() {
            format!("{host}:{remote_path}")
        } else {
            format!("{}@{host}:{remote_path}", target.username)
        }
    }

    async fn run(mut cmd: Command, timeout: Duration) -> ProcessOutcome {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => return ProcessOutcome::LaunchFailed(err),
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => ProcessOutcome::Finished {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Ok(Err(err)) => ProcessOutcome::LaunchFailed(err),
            Err(_) => ProcessOutcome::TimedOut,
        }
    }

    fn upload_command(
        &self,
        target: &ResolvedTarget,
        local_path: &Path,
        remote_path: &str,
        timeout: Duration,
    ) -> Command {
        let destination = Self::remote_spec(target, remote_path);
        self.scp_command(target, &local_path.to_string_lossy(), &destination, timeout)
    }

    fn download_command(
        &self,
        target: &ResolvedTarget,
        remote_path: &str,
        local_path: &Path,
        timeout: Duration,
    ) -> Command {
        let source = Self::remote_spec(target, remote_path);
        self.scp_command(target, &source, &local_path.to_string_lossy(), timeout)
    }

    async fn transfer(&self, cmd: Command, timeout: Duration) -> TransferOutcome {
        match Self::run(cmd, timeout).await {
            ProcessOutcome::Finished { code: Some(0), .. } => {
                TransferOutcome::ok()
            }
            ProcessOutcome::Finished { code, stderr, .. } => {
                let detail = stderr.trim();
                TransferOutcome::failed(match code {
                    Some(code) if detail.is_empty() => {
                        format!("scp exited with status {code}")
                    }
                    Some(code) => {
                        format!("scp exited with status {code}: {detail}")
                    }
                    None => "scp terminated by signal".to_string(),
                })
            }
            ProcessOutcome::TimedOut => TransferOutcome::failed(format!(
                "transfer timed out after {}s",
                timeout.as_secs_f64()
            )),
            ProcessOutcome::LaunchFailed(err) => TransferOutcome::failed(
                format!("failed to launch {}: {err}", self.config.scp_program),
            ),
        }
    }
}

#[async_trait]
impl RemoteChannel for SshChannel {
    async fn test_connection(
        &self,
        target: &ResolvedTarget,
        timeout: Duration,
    ) -> ConnectionProbe {
        let started = Instant::now();
        let cmd = self.ssh_command(target, "true", timeout);
        let outcome = Self::run(cmd, timeout).await;
        let elapsed = started.elapsed();

        let probe = match outcome {
            ProcessOutcome::Finished { code: Some(0), .. } => {
                ConnectionProbe::ok(elapsed)
            }
            ProcessOutcome::Finished {
                code: Some(SSH_ERROR_STATUS),
                stderr,
                ..
            } => ConnectionProbe::failed(
                elapsed,
                FailureKind::Refused,
                non_empty_or(stderr.trim(), "connection refused"),
            ),
            ProcessOutcome::Finished { code, stderr, .. } => {
                ConnectionProbe::failed(
                    elapsed,
                    FailureKind::ChannelError,
                    format!(
                        "handshake exited with {:?}: {}",
                        code,
                        stderr.trim()
                    ),
                )
            }
            ProcessOutcome::TimedOut => ConnectionProbe::failed(
                elapsed,
                FailureKind::Timeout,
                format!(
                    "connection timed out after {}s",
                    timeout.as_secs_f64()
                ),
            ),
            ProcessOutcome::LaunchFailed(err) => ConnectionProbe::failed(
                elapsed,
                FailureKind::ChannelError,
                format!("failed to launch {}: {err}", self.config.ssh_program),
            ),
        };

        if !probe.success {
            debug!(
                target: "scan::channel",
                host = %target.host,
                port = target.port,
                failure = ?probe.failure,
                "connection probe failed"
            );
        }
        probe
    }

    async fn execute(
        &self,
        target: &ResolvedTarget,
        command: &str,
        timeout: Duration,
    ) -> ExecOutput {
        let started = Instant::now();
        let cmd = self.ssh_command(target, command, timeout);
        let outcome = Self::run(cmd, timeout).await;
        let duration = started.elapsed();

        match outcome {
            ProcessOutcome::Finished {
                code,
                stdout,
                stderr,
            } => {
                let failure = match code {
                    Some(0) => None,
                    Some(SSH_ERROR_STATUS) => Some(FailureKind::ChannelError),
                    _ => Some(FailureKind::NonZeroExit),
                };
                ExecOutput {
                    success: failure.is_none(),
                    exit_code: code,
                    stdout,
                    stderr,
                    duration,
                    failure,
                }
            }
            ProcessOutcome::TimedOut => {
                warn!(
                    target: "scan::channel",
                    host = %target.host,
                    timeout_ms = timeout.as_millis() as u64,
                    "remote command killed after timeout"
                );
                ExecOutput::failed(
                    duration,
                    FailureKind::Timeout,
                    format!(
                        "command timed out after {}s",
                        timeout.as_secs_f64()
                    ),
                )
            }
            ProcessOutcome::LaunchFailed(err) => ExecOutput::failed(
                duration,
                FailureKind::ChannelError,
                format!("failed to launch {}: {err}", self.config.ssh_program),
            ),
        }
    }

    async fn copy_to(
        &self,
        target: &ResolvedTarget,
        local_path: &Path,
        remote_path: &str,
        timeout: Duration,
    ) -> TransferOutcome {
        let cmd = self.upload_command(target, local_path, remote_path, timeout);
        self.transfer(cmd, timeout).await
    }

    async fn copy_from(
        &self,
        target: &ResolvedTarget,
        remote_path: &str,
        local_path: &Path,
        timeout: Duration,
    ) -> TransferOutcome {
        let cmd = self.download_command(target, remote_path, local_path, timeout);
        self.transfer(cmd, timeout).await
    }
}

fn non_empty_or(detail: &str, fallback: &str) -> String {
    if detail.is_empty() {
        fallback.to_string()
    } else {
        detail.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetscan_model::TargetId;

    fn target() -> ResolvedTarget {
        ResolvedTarget {
            id: TargetId::new(),
            name: "db-02".into(),
            host: "db-02.internal".into(),
            port: 2222,
            username: "audit".into(),
            credential_ref: Some("/etc/fleetscan/keys/audit".into()),
            tags: vec!["db".into()],
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn ssh_command_carries_port_identity_and_batch_mode() {
        let channel = SshChannel::default();
        let cmd =
            channel.ssh_command(&target(), "uname -r", Duration::from_millis(500));
        let args = args(&cmd);

        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=1".to_string()));
        assert!(args.contains(&"StrictHostKeyChecking=yes".to_string()));
        assert_eq!(
            &args[args.len() - 5..],
            &["-p", "2222", "audit@db-02.internal", "--", "uname -r"]
        );
        let identity = args.iter().position(|a| a == "-i").expect("-i flag");
        assert_eq!(args[identity + 1], "/etc/fleetscan/keys/audit");
    }

    #[test]
    fn scp_uses_capital_port_flag_and_remote_spec() {
        let channel = SshChannel::new(SshChannelConfig {
            strict_host_key_checking: false,
            ..SshChannelConfig::default()
        });
        let destination = SshChannel::remote_spec(&target(), "/tmp/scan.sh");
        let cmd = channel.scp_command(
            &target(),
            "/opt/payload/scan.sh",
            &destination,
            Duration::from_secs(30),
        );
        let args = args(&cmd);

        assert_eq!(args[0], "-q");
        assert!(args.contains(&"StrictHostKeyChecking=accept-new".to_string()));
        assert_eq!(
            &args[args.len() - 4..],
            &[
                "-P",
                "2222",
                "/opt/payload/scan.sh",
                "audit@db-02.internal:/tmp/scan.sh"
            ]
        );
    }

    #[test]
    fn remote_spec_brackets_ipv6_hosts() {
        let mut v6 = target();
        v6.host = "2001:db8::1".into();
        assert_eq!(
            SshChannel::remote_spec(&v6, "/tmp/scan.sh"),
            "audit@[2001:db8::1]:/tmp/scan.sh"
        );

        v6.username.clear();
        assert_eq!(
            SshChannel::remote_spec(&v6, "/tmp/scan.sh"),
            "[2001:db8::1]:/tmp/scan.sh"
        );

        v6.host = "[2001:db8::1]".into();
        assert_eq!(
            SshChannel::remote_spec(&v6, "/tmp/scan.sh"),
            "[2001:db8::1]:/tmp/scan.sh"
        );
    }

    #[test]
    fn copy_from_reads_the_remote_spec_into_the_local_path() {
        let channel = SshChannel::default();
        let cmd = channel.download_command(
            &target(),
            "/var/log/fleetscan.json",
            Path::new("/tmp/fleetscan/db-02.json"),
            Duration::from_secs(30),
        );
        let args = args(&cmd);

        assert_eq!(args[0], "-q");
        assert_eq!(
            &args[args.len() - 4..],
            &[
                "-P",
                "2222",
                "audit@db-02.internal:/var/log/fleetscan.json",
                "/tmp/fleetscan/db-02.json"
            ]
        );
    }

    #[test]
    fn copy_to_writes_the_local_path_to_the_remote_spec() {
        let mut v6 = target();
        v6.host = "2001:db8::1".into();
        let cmd = SshChannel::default().upload_command(
            &v6,
            Path::new("/opt/payload/scan.sh"),
            "/tmp/scan.sh",
            Duration::from_secs(30),
        );
        let args = args(&cmd);

        assert_eq!(
            &args[args.len() - 2..],
            &["/opt/payload/scan.sh", "audit@[2001:db8::1]:/tmp/scan.sh"]
        );
    }

    #[tokio::test]
    async fn missing_client_binary_is_a_channel_error() {
        let channel = SshChannel::new(SshChannelConfig {
            ssh_program: "/nonexistent/fleetscan-ssh".into(),
            ..SshChannelConfig::default()
        });
        let probe = channel
            .test_connection(&target(), Duration::from_secs(1))
            .await;

        assert!(!probe.success);
        assert_eq!(probe.failure, Some(FailureKind::ChannelError));
    }
}
