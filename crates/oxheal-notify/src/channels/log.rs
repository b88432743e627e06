use crate::routing::ChannelConfig;
use crate::{DeliveryStatus, Notification, NotificationDispatcher, Result};
use async_trait::async_trait;

/// Writes notifications to the tracing log. Useful as a default channel and
/// in environments without outbound HTTP.
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn notify(
        &self,
        channel: &ChannelConfig,
        message: &Notification,
    ) -> Result<DeliveryStatus> {
        tracing::info!(
            channel = %channel.name,
            kind = message.kind.as_str(),
            alert_id = %message.alert_id,
            target_id = %message.target_id,
            severity = %message.severity,
            oncall = message.oncall_user.as_deref().unwrap_or("-"),
            "{}",
            message.message
        );
        Ok(DeliveryStatus::Delivered)
    }

    fn kind(&self) -> &str {
        "log"
    }
}
