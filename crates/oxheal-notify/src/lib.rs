//! Fire-and-forget notification delivery.
//!
//! The alert and remediation paths push [`Notification`]s onto a bounded
//! [`queue::NotificationQueue`] and never wait for delivery. An independent
//! [`worker::NotificationWorker`] drains the queue, routes each message to
//! the channels whose `min_severity` it meets and hands it to the
//! [`NotificationDispatcher`] registered for the channel kind.

pub mod channels;
pub mod error;
pub mod queue;
pub mod routing;
pub mod worker;


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oxheal_common::types::Severity;
use serde::{Deserialize, Serialize};

pub use error::{NotifyError, Result};
pub use queue::{NotificationQueue, NotificationReceiver};
pub use routing::{ChannelConfig, ChannelKind};
pub use worker::NotificationWorker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Firing,
    Refiring,
    Escalated,
    Resolved,
    ApprovalRequired,
    RemediationFinished,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Refiring => "refiring",
            Self::Escalated => "escalated",
            Self::Resolved => "resolved",
            Self::ApprovalRequired => "approval_required",
            Self::RemediationFinished => "remediation_finished",
        }
    }
}

/// A message ready for delivery. Content is a plain summary line; channels
/// decide how to present it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub alert_id: String,
    pub rule_id: String,
    pub target_id: String,
    pub severity: Severity,
    pub message: String,
    /// On-call user paged by an escalation.
    pub oncall_user: Option<String>,
    pub task_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        alert_id: &str,
        rule_id: &str,
        target_id: &str,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            alert_id: alert_id.to_string(),
            rule_id: rule_id.to_string(),
            target_id: target_id.to_string(),
            severity,
            message: message.into(),
            oncall_user: None,
            task_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_oncall(mut self, user: Option<String>) -> Self {
        self.oncall_user = user;
        self
    }

    pub fn with_task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    /// The endpoint answered but refused the message; not retried.
    Rejected(String),
}

/// Delivers one notification to one configured channel.
///
/// Transport failures are returned as errors and retried by the worker;
/// a [`DeliveryStatus::Rejected`] answer is final.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(
        &self,
        channel: &ChannelConfig,
        message: &Notification,
    ) -> Result<DeliveryStatus>;

    /// Channel kind served by this dispatcher (e.g. `"webhook"`).
    fn kind(&self) -> &str;
}
