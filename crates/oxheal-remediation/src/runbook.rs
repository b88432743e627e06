//! Runbooks: named repair procedures with a check/execute/rollback contract.

use crate::executor::{shell_quote, CommandExecutor};
use oxheal_common::alert::Alert;
use oxheal_common::remediation::{CommandResult, Diagnosis};
use oxheal_common::rule::{AlertRule, RuleType};
use oxheal_common::types::RiskLevel;
use serde::{Deserialize, Serialize};

/// What a runbook gets to know about the alert it repairs.
#[derive(Debug, Clone)]
pub struct RunbookContext {
    pub alert_id: String,
    pub host: String,
    pub message: String,
    pub value: Option<f64>,
    /// `None` when the rule was deleted after the alert opened.
    pub rule: Option<AlertRule>,
    pub diagnosis: Diagnosis,
}

impl RunbookContext {
    pub fn new(alert: &Alert, rule: Option<&AlertRule>, diagnosis: Diagnosis) -> Self {
        Self {
            alert_id: alert.id.clone(),
            host: alert.target_id.clone(),
            message: alert.message.clone(),
            value: alert.value,
            rule: rule.cloned(),
            diagnosis,
        }
    }

    /// Metric name of a metric or db-metric rule.
    pub fn metric(&self) -> Option<&str> {
        self.rule
            .as_ref()
            .and_then(|r| r.condition.threshold())
            .map(|(metric, _, _)| metric)
    }

    pub fn rule_type(&self) -> Option<RuleType> {
        self.rule.as_ref().map(|r| r.rule_type())
    }
}

/// The repair a runbook performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunbookAction {
    ServiceRestart {
        service: String,
    },
    DiskCleanup {
        #[serde(default = "default_cleanup_paths")]
        paths: Vec<String>,
        #[serde(default = "default_older_than_days")]
        older_than_days: u32,
    },
    CacheDrop,
    ProcessKill {
        pattern: String,
        #[serde(default = "default_signal")]
        signal: String,
    },
    LogRotate {
        #[serde(default = "default_logrotate_config")]
        config: String,
    },
    ConnectionReset {
        port: u16,
    },
}

fn default_cleanup_paths() -> Vec<String> {
    vec!["/tmp".to_string(), "/var/tmp".to_string()]
}

fn default_older_than_days() -> u32 {
    7
}

fn default_signal() -> String {
    "TERM".to_string()
}

fn default_logrotate_config() -> String {
    "/etc/logrotate.conf".to_string()
}

impl RunbookAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServiceRestart { .. } => "service_restart",
            Self::DiskCleanup { .. } => "disk_cleanup",
            Self::CacheDrop => "cache_drop",
            Self::ProcessKill { .. } => "process_kill",
            Self::LogRotate { .. } => "log_rotate",
            Self::ConnectionReset { .. } => "connection_reset",
        }
    }

    pub fn default_risk(&self) -> RiskLevel {
        match self {
            Self::DiskCleanup { .. } | Self::CacheDrop | Self::LogRotate { .. } => RiskLevel::Low,
            Self::ServiceRestart { .. } | Self::ConnectionReset { .. } => RiskLevel::Medium,
            Self::ProcessKill { .. } => RiskLevel::High,
        }
    }

    fn commands(&self) -> Vec<String> {
        match self {
            Self::ServiceRestart { service } => vec![
                format!("systemctl restart {}", shell_quote(service)),
                // Restart returns before the unit is up; confirm it stayed up.
                format!("systemctl is-active --quiet {}", shell_quote(service)),
            ],
            Self::DiskCleanup {
                paths,
                older_than_days,
            } => paths
                .iter()
                .map(|p| {
                    format!(
                        // -xdev keeps the sweep on one filesystem.
                        "find {} -xdev -type f -mtime +{older_than_days} -delete",
                        shell_quote(p)
                    )
                })
                .collect(),
            Self::CacheDrop => vec![
                "sync".to_string(),
                "echo 3 > /proc/sys/vm/drop_caches".to_string(),
            ],
            Self::ProcessKill { pattern, signal } => {
                vec![format!("pkill -{signal} -f {}", shell_quote(pattern))]
            }
            Self::LogRotate { config } => vec![format!("logrotate -f {}", shell_quote(config))],
            Self::ConnectionReset { port } => {
                // Port is numeric, so the filter needs no quoting.
                vec![format!("ss -K '( sport = :{port} or dport = :{port} )'")]
            }
        }
    }

    fn rollback_commands(&self) -> Vec<String> {
        match self {
            // A failed restart can leave the unit stopped.
            Self::ServiceRestart { service } => {
                vec![format!("systemctl start {}", shell_quote(service))]
            }
            _ => Vec::new(),
        }
    }

    fn validate(&self) -> Result<(), String> {
        let safe_word = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '-'))
        };
        match self {
            Self::ServiceRestart { service } if !safe_word(service) => {
                Err(format!("invalid service name '{service}'"))
            }
            Self::DiskCleanup { paths, .. } if paths.is_empty() => {
                Err("disk_cleanup needs at least one path".to_string())
            }
            // Never the root itself.
            Self::DiskCleanup { paths, .. } => {
                match paths.iter().find(|p| !p.starts_with('/') || p.as_str() == "/") {
                    Some(p) => Err(format!("cleanup path '{p}' must be an absolute path below /")),
                    None => Ok(()),
                }
            }
            Self::ProcessKill { pattern, .. } if pattern.trim().is_empty() => {
                Err("process_kill needs a pattern".to_string())
            }
            Self::ProcessKill { signal, .. } if !safe_word(signal) => {
                Err(format!("invalid signal '{signal}'"))
            }
            Self::ConnectionReset { port: 0 } => Err("connection_reset needs a port".to_string()),
            _ => Ok(()),
        }
    }
}

/// A named repair procedure.
///
/// `check` decides applicability, `execute` runs the action's commands
/// stopping at the first failure, `rollback` undoes what can be undone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runbook {
    pub name: String,
    /// Higher wins when several runbooks match.
    #[serde(default)]
    pub priority: i32,
    /// Overrides the action's default risk.
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
    /// Glob patterns on the alerting metric name.
    #[serde(default)]
    pub metrics: Vec<String>,
    /// Case-insensitive substrings of a log alert's message.
    #[serde(default)]
    pub log_keywords: Vec<String>,
    #[serde(default = "default_hosts")]
    pub hosts: String,
    pub action: RunbookAction,
    /// Exit status 0 means the repair worked.
    #[serde(default)]
    pub verify_command: Option<String>,
}

fn default_hosts() -> String {
    "*".to_string()
}

/// Commands run by one `execute` or `rollback` call.
#[derive(Debug, Clone, Default)]
pub struct RunbookOutcome {
    pub results: Vec<CommandResult>,
    /// Set when a command failed or could not be run; later commands were skipped.
    pub failure: Option<String>,
}

impl Runbook {
    pub fn new(name: impl Into<String>, priority: i32, action: RunbookAction) -> Self {
        Self {
            name: name.into(),
            priority,
            risk_level: None,
            metrics: Vec::new(),
            log_keywords: Vec::new(),
            hosts: default_hosts(),
            action,
            verify_command: None,
        }
    }

    pub fn on_metrics(mut self, patterns: &[&str]) -> Self {
        self.metrics = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn on_log_keywords(mut self, keywords: &[&str]) -> Self {
        self.log_keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn risk(&self) -> RiskLevel {
        self.risk_level.unwrap_or_else(|| self.action.default_risk())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("runbook name is empty".to_string());
        }
        if self.metrics.is_empty() && self.log_keywords.is_empty() {
            return Err(format!("runbook '{}' matches nothing", self.name));
        }
        self.action
            .validate()
            .map_err(|e| format!("runbook '{}': {e}", self.name))
    }

    pub fn check(&self, ctx: &RunbookContext) -> bool {
        // Host scoping applies before any trigger matching.
        if !glob_match::glob_match(&self.hosts, &ctx.host) {
            return false;
        }
        match ctx.rule_type() {
            Some(RuleType::Metric | RuleType::DbMetric) => ctx.metric().is_some_and(|metric| {
                self.metrics
                    .iter()
                    .any(|p| glob_match::glob_match(p, metric))
            }),
            Some(RuleType::LogKeyword) => {
                // Plain substrings; keyword regexes belong to rules, not runbooks.
                let message = ctx.message.to_lowercase();
                self.log_keywords
                    .iter()
                    .any(|k| message.contains(&k.to_lowercase()))
            }
            None => false,
        }
    }

    pub fn commands(&self, _ctx: &RunbookContext) -> Vec<String> {
        self.action.commands()
    }

    pub fn rollback_commands(&self, _ctx: &RunbookContext) -> Vec<String> {
        self.action.rollback_commands()
    }

    /// Every command this runbook may send to the host: the action, its
    /// rollback and the verify command.
    pub fn gated_commands(&self, ctx: &RunbookContext) -> Vec<String> {
        let mut commands = self.commands(ctx);
        commands.extend(self.rollback_commands(ctx));
        commands.extend(self.verify_command.iter().cloned());
        commands
    }

    pub async fn execute(
        &self,
        ctx: &RunbookContext,
        executor: &dyn CommandExecutor,
    ) -> RunbookOutcome {
        run_all(&ctx.host, &self.commands(ctx), executor).await
    }

    pub async fn rollback(
        &self,
        ctx: &RunbookContext,
        executor: &dyn CommandExecutor,
    ) -> RunbookOutcome {
        run_all(&ctx.host, &self.rollback_commands(ctx), executor).await
    }
}

async fn run_all(host: &str, commands: &[String], executor: &dyn CommandExecutor) -> RunbookOutcome {
    let mut outcome = RunbookOutcome::default();
    for command in commands {
        match executor.run(host, command).await {
            Ok(result) => {
                let exit_code = result.exit_code;
                outcome.results.push(result);
                // Later commands assume the earlier ones worked.
                if exit_code != 0 {
                    outcome.failure = Some(format!("`{command}` exited with {exit_code}"));
                    break;
                }
            }
            Err(e) => {
                // Keep a record of the attempt even though nothing ran.
                outcome.results.push(CommandResult {
                    host: host.to_string(),
                    command: command.clone(),
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: e.to_string(),
                    duration_ms: 0,
                    dry_run: executor.dry_run(),
                });
                outcome.failure = Some(e.to_string());
                break;
            }
        }
    }
    outcome
}

/// The runbooks registered when none are configured.
pub fn default_runbooks() -> Vec<Runbook> {
    vec![
        Runbook::new(
            "service_restart",
            50,
            RunbookAction::ServiceRestart {
                service: "app".to_string(),
            },
        )
        .on_metrics(&["cpu_percent", "cpu_usage", "load_*"])
        .on_log_keywords(&["out of memory", "deadlock detected"]),
        Runbook::new(
            "disk_cleanup",
            60,
            RunbookAction::DiskCleanup {
                paths: default_cleanup_paths(),
                older_than_days: default_older_than_days(),
            },
        )
        .on_metrics(&["disk_*"])
        .on_log_keywords(&["no space left on device"]),
        Runbook::new(
            "log_rotate",
            30,
            RunbookAction::LogRotate {
                config: default_logrotate_config(),
            },
        )
        .on_metrics(&["disk_*"]),
        Runbook::new("cache_drop", 40, RunbookAction::CacheDrop)
            .on_metrics(&["memory_percent", "memory_usage", "swap_*"]),
        Runbook::new(
            "connection_reset",
            40,
            RunbookAction::ConnectionReset { port: 5432 },
        )
        .on_metrics(&["db_connections*", "tcp_close_wait*"])
        .on_log_keywords(&["too many connections"]),
    ]
}
