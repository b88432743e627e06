use crate::routing::{ChannelConfig, ChannelKind};
use crate::{DeliveryStatus, Notification, NotificationDispatcher, NotifyError, Result};
use async_trait::async_trait;
use std::time::Duration;

const MAX_ERROR_BODY: usize = 512;

/// POSTs the notification as JSON to the channel's URL.
pub struct WebhookDispatcher {
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn payload(message: &Notification) -> serde_json::Value {
        serde_json::json!({
            "kind": message.kind.as_str(),
            "alert_id": message.alert_id,
            "rule_id": message.rule_id,
            "target_id": message.target_id,
            "severity": message.severity.to_string(),
            "message": message.message,
            "oncall_user": message.oncall_user,
            "task_id": message.task_id,
            "timestamp": message.created_at.to_rfc3339(),
        })
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn notify(
        &self,
        channel: &ChannelConfig,
        message: &Notification,
    ) -> Result<DeliveryStatus> {
        let ChannelKind::Webhook { url, headers } = &channel.kind else {
            return Err(NotifyError::InvalidConfig(format!(
                "channel '{}' is not a webhook",
                channel.name
            )));
        };

        let mut request = self.client.post(url).json(&Self::payload(message));
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let resp = request.send().await?;
        let status = resp.status();
        if status.is_success() {
            tracing::debug!(channel = %channel.name, alert_id = %message.alert_id, "Webhook delivered");
            return Ok(DeliveryStatus::Delivered);
        }

        let mut body = resp.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        // A 4xx will not improve on retry.
        if status.is_client_error() {
            return Ok(DeliveryStatus::Rejected(format!("HTTP {status}: {body}")));
        }
        Err(NotifyError::ApiError {
            service: channel.name.clone(),
            status: status.as_u16(),
            body,
        })
    }

    fn kind(&self) -> &str {
        "webhook"
    }
}
