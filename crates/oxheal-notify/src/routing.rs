use crate::error::{NotifyError, Result};
use oxheal_common::types::Severity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelKind {
    Webhook {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Log,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook { .. } => "webhook",
            Self::Log => "log",
        }
    }
}

/// One delivery target plus its routing and retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: ChannelKind,
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_min_severity() -> Severity {
    Severity::Info
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl ChannelConfig {
    pub fn should_send(&self, severity: Severity) -> bool {
        severity >= self.min_severity
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(NotifyError::InvalidConfig("channel name is empty".into()));
        }
        if let ChannelKind::Webhook { url, .. } = &self.kind {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(NotifyError::InvalidConfig(format!(
                    "channel '{}': webhook url must be http(s), got '{url}'",
                    self.name
                )));
            }
        }
        Ok(())
    }
}
