use oxheal_common::alert::OnCallSchedule;
use chrono::{DateTime, Utc};
use oxheal_common::rule::{AlertRule, RuleCondition, SilenceWindow};
use oxheal_common::types::Severity;
use oxheal_notify::ChannelConfig;
use oxheal_remediation::{ExecutorConfig, RemediationConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Snowflake machine id, 0-31. Distinct per instance sharing a database.
    #[serde(default = "default_machine_id")]
    pub machine_id: i32,

    /// CORS allowed origins; empty allows any origin.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,

    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub remediation: RemediationConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub oncall: Vec<OnCallSchedule>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            machine_id: default_machine_id(),
            cors_allowed_origins: Vec::new(),
            evaluator: EvaluatorConfig::default(),
            escalation: EscalationConfig::default(),
            remediation: RemediationConfig::default(),
            executor: ExecutorConfig::default(),
            ai: AiConfig::default(),
            notification: NotificationConfig::default(),
            oncall: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config '{}': {}", path, e))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config '{}': {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.evaluator.tick_secs == 0 {
            anyhow::bail!("evaluator.tick_secs must be greater than 0");
        }
        if self.escalation.tick_secs == 0 {
            anyhow::bail!("escalation.tick_secs must be greater than 0");
        }
        // Snowflake reserves five bits for the machine.
        if !(0..=31).contains(&self.machine_id) {
            anyhow::bail!("machine_id must be within 0-31, got {}", self.machine_id);
        }
        for channel in &self.notification.channels {
            channel.validate()?;
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("oxheal.db")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    #[serde(default = "default_evaluator_tick_secs")]
    pub tick_secs: u64,
    /// Per-call deadline for metric sources.
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,
    /// How long ingested samples are kept for `series` queries.
    #[serde(default = "default_metric_retention_secs")]
    pub metric_retention_secs: u64,
    /// A latest sample older than this counts as missing.
    #[serde(default = "default_metric_max_age_secs")]
    pub metric_max_age_secs: u64,
    #[serde(default = "default_log_bus_capacity")]
    pub log_bus_capacity: usize,
    /// Window for grouping open alerts of one target.
    #[serde(default = "default_group_window_secs")]
    pub group_window_secs: u64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_evaluator_tick_secs(),
            source_timeout_ms: default_source_timeout_ms(),
            metric_retention_secs: default_metric_retention_secs(),
            metric_max_age_secs: default_metric_max_age_secs(),
            log_bus_capacity: default_log_bus_capacity(),
            group_window_secs: default_group_window_secs(),
        }
    }
}

fn default_evaluator_tick_secs() -> u64 {
    15
}

fn default_source_timeout_ms() -> u64 {
    5000
}

fn default_metric_retention_secs() -> u64 {
    3600
}

fn default_metric_max_age_secs() -> u64 {
    300
}

fn default_log_bus_capacity() -> usize {
    1024
}

fn default_group_window_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "default_escalation_tick_secs")]
    pub tick_secs: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_escalation_tick_secs(),
        }
    }
}

fn default_escalation_tick_secs() -> u64 {
    60
}

/// OpenAI-compatible diagnosis provider. Disabled means every task runs
/// with an empty diagnosis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            webhook_timeout_secs: default_webhook_timeout_secs(),
            channels: default_channels(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![ChannelConfig {
        name: "log".to_string(),
        kind: oxheal_notify::ChannelKind::Log,
        min_severity: Severity::Info,
        max_retries: 0,
        retry_backoff_ms: 0,
    }]
}

fn default_http_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_machine_id() -> i32 {
    1
}

// ---- Rules seed file types (used by `init-rules` CLI subcommand) ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesSeedFile {
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

/// A user-defined rule as written in seed files and API request bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    #[serde(flatten)]
    pub condition: RuleCondition,
    #[serde(default)]
    pub duration_secs: u64,
    #[serde(default = "default_seed_severity")]
    pub severity: Severity,
    #[serde(default = "default_seed_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub silence: Option<SilenceWindow>,
    #[serde(default = "default_target_pattern")]
    pub target_pattern: String,
    #[serde(default = "default_seed_enabled")]
    pub enabled: bool,
}

impl RuleDefinition {
    pub fn into_rule(self, id: String, now: DateTime<Utc>) -> AlertRule {
        AlertRule {
            id,
            name: self.name,
            condition: self.condition,
            duration_secs: self.duration_secs,
            severity: self.severity,
            cooldown_secs: self.cooldown_secs,
            silence: self.silence,
            target_pattern: self.target_pattern,
            is_builtin: false,
            enabled: self.enabled,
            created_at: now,
            updated_at: now,
        }
    }
}

fn default_seed_severity() -> Severity {
    Severity::Warning
}

fn default_seed_cooldown_secs() -> u64 {
    300
}

fn default_target_pattern() -> String {
    "*".to_string()
}

fn default_seed_enabled() -> bool {
    true
}
