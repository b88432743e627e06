use crate::Notification;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Producer side of the bounded notification queue. Cheap to clone.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<Notification>,
    dropped: Arc<AtomicU64>,
}

pub type NotificationReceiver = mpsc::Receiver<Notification>;

impl NotificationQueue {
    pub fn bounded(capacity: usize) -> (Self, NotificationReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Enqueues without waiting. A full or closed queue drops the message.
    pub fn enqueue(&self, notification: Notification) -> bool {
        // Evaluation must never wait on delivery.
        match self.tx.try_send(notification) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(n)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    alert_id = %n.alert_id,
                    kind = n.kind.as_str(),
                    "Notification queue full, message dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(n)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    alert_id = %n.alert_id,
                    "Notification worker stopped, message dropped"
                );
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
