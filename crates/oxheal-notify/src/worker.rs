use crate::queue::NotificationReceiver;
use crate::routing::ChannelConfig;
use crate::{DeliveryStatus, Notification, NotificationDispatcher, NotifyError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Drains the notification queue independently of the producers.
pub struct NotificationWorker {
    channels: Vec<ChannelConfig>,
    dispatchers: HashMap<String, Arc<dyn NotificationDispatcher>>,
}

impl NotificationWorker {
    pub fn new(channels: Vec<ChannelConfig>) -> Self {
        Self {
            channels,
            dispatchers: HashMap::new(),
        }
    }

    pub fn register(mut self, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        self.dispatchers
            .insert(dispatcher.kind().to_string(), dispatcher);
        self
    }

    pub fn channels(&self) -> &[ChannelConfig] {
        &self.channels
    }

    /// Runs until every producer handle has been dropped.
    pub async fn run(self, mut rx: NotificationReceiver) {
        tracing::info!(channels = self.channels.len(), "Notification worker started");
        while let Some(notification) = rx.recv().await {
            self.deliver(&notification).await;
        }
        tracing::info!("Notification worker stopped");
    }

    /// Sends one notification to every channel it routes to. Returns the
    /// number of successful deliveries.
    pub async fn deliver(&self, notification: &Notification) -> usize {
        let mut delivered = 0;
        for channel in &self.channels {
            if !channel.should_send(notification.severity) {
                continue;
            }
            match self.deliver_to(channel, notification).await {
                Ok(DeliveryStatus::Delivered) => delivered += 1,
                Ok(DeliveryStatus::Rejected(reason)) => {
                    tracing::warn!(
                        channel = %channel.name,
                        alert_id = %notification.alert_id,
                        reason = %reason,
                        "Notification rejected by channel"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        channel = %channel.name,
                        alert_id = %notification.alert_id,
                        error = %e,
                        "Failed to send notification"
                    );
                }
            }
        }
        delivered
    }

    async fn deliver_to(
        &self,
        channel: &ChannelConfig,
        notification: &Notification,
    ) -> crate::Result<DeliveryStatus> {
        let kind = channel.kind.as_str();
        let dispatcher = self
            .dispatchers
            .get(kind)
            .ok_or_else(|| NotifyError::UnknownChannelKind(kind.to_string()))?;

        let mut attempt = 0;
        loop {
            match dispatcher.notify(channel, notification).await {
                Ok(status) => return Ok(status),
                Err(e) if attempt < channel.max_retries => {
                    attempt += 1;
                    tracing::debug!(
                        channel = %channel.name,
                        attempt,
                        error = %e,
                        "Retrying notification"
                    );
                    // Linear backoff.
                    let backoff = channel.retry_backoff_ms.saturating_mul(attempt as u64);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
