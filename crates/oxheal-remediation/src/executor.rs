//! Command transport for runbook steps.

use crate::error::{RemediationError, Result};
use async_trait::async_trait;
use oxheal_common::remediation::CommandResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Runs one shell command on a host.
///
/// A command that ran and exited non-zero is an `Ok` result; `Err` means
/// the command could not be run at all or timed out.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, host: &str, command: &str) -> Result<CommandResult>;

    /// True when commands are only simulated.
    fn dry_run(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorMode {
    DryRun,
    Local,
    Ssh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_mode")]
    pub mode: ExecutorMode,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default)]
    pub ssh_key_path: Option<String>,
    /// Target id to ssh destination. Unlisted targets are dialled by id.
    #[serde(default)]
    pub addresses: HashMap<String, String>,
}

fn default_mode() -> ExecutorMode {
    ExecutorMode::DryRun
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            command_timeout_secs: default_command_timeout_secs(),
            ssh_user: default_ssh_user(),
            ssh_port: default_ssh_port(),
            ssh_key_path: None,
            addresses: HashMap::new(),
        }
    }
}

pub fn build_executor(config: &ExecutorConfig) -> Arc<dyn CommandExecutor> {
    let timeout = Duration::from_secs(config.command_timeout_secs.max(1));
    match config.mode {
        ExecutorMode::DryRun => Arc::new(DryRunExecutor),
        ExecutorMode::Local => Arc::new(LocalExecutor::new(timeout)),
        ExecutorMode::Ssh => Arc::new(SshExecutor {
            user: config.ssh_user.clone(),
            port: config.ssh_port,
            key_path: config.ssh_key_path.clone(),
            addresses: config.addresses.clone(),
            timeout,
        }),
    }
}

/// Runs commands on this machine through `sh -c`, whatever the host.
pub struct LocalExecutor {
    timeout: Duration,
}

impl LocalExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandExecutor for LocalExecutor {
    async fn run(&self, host: &str, command: &str) -> Result<CommandResult> {
        tracing::debug!(host = %host, cmd = %command, "Running local command");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        spawn_and_wait(cmd, host, command, self.timeout).await
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Runs commands on the target through the system `ssh` binary.
pub struct SshExecutor {
    user: String,
    port: u16,
    key_path: Option<String>,
    addresses: HashMap<String, String>,
    timeout: Duration,
}

#[async_trait]
impl CommandExecutor for SshExecutor {
    async fn run(&self, host: &str, command: &str) -> Result<CommandResult> {
        // Unmapped targets are assumed resolvable by id.
        let address = self.addresses.get(host).map_or(host, String::as_str);
        tracing::debug!(host = %host, address = %address, cmd = %command, "Running remote command");
        let mut cmd = Command::new("ssh");
        if let Some(key) = &self.key_path {
            cmd.arg("-i").arg(key);
        }
        if self.port != 22 {
            cmd.arg("-p").arg(self.port.to_string());
        }
        cmd.arg("-o")
            // Never prompt; a missing key must fail fast.
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.timeout.as_secs().max(5)))
            .arg(format!("{}@{}", self.user, address))
            .arg(command);
        spawn_and_wait(cmd, host, command, self.timeout).await
    }

    fn name(&self) -> &'static str {
        "ssh"
    }
}

async fn spawn_and_wait(
    mut cmd: Command,
    host: &str,
    command: &str,
    timeout: Duration,
) -> Result<CommandResult> {
    let started = Instant::now();
    let child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // A timed-out or cancelled run must not leave the process behind.
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| RemediationError::ExecutionFailure(format!("spawn `{command}`: {e}")))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(CommandResult {
            host: host.to_string(),
            command: command.to_string(),
            // No code means killed by a signal.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            dry_run: false,
        }),
        Ok(Err(e)) => Err(RemediationError::ExecutionFailure(e.to_string())),
        Err(_) => Err(RemediationError::ExecutionFailure(format!(
            "`{command}` timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

/// Simulates every command as successful.
pub struct DryRunExecutor;

#[async_trait]
impl CommandExecutor for DryRunExecutor {
    async fn run(&self, host: &str, command: &str) -> Result<CommandResult> {
        tracing::info!(host = %host, cmd = %command, "Dry run, command not executed");
        Ok(CommandResult {
            host: host.to_string(),
            command: command.to_string(),
            exit_code: 0,
            stdout: format!("[dry-run] would run on {host}: {command}"),
            stderr: String::new(),
            duration_ms: 0,
            dry_run: true,
        })
    }

    fn dry_run(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "dry_run"
    }
}

/// Single-quotes `s` for `sh`.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
