//! Notification Bus - Pub/Sub for User-Visible Events
//!
//! In-memory pub/sub over tokio broadcast channels. Every error-taxonomy
//! surface emits here with a level and a short code; terminal rendering is
//! a subscriber concern, outside the core.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
    Critical,
}

/// A structured, user-visible event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,

    /// Short machine-readable code, e.g. `schema_mismatch`.
    pub code: String,

    pub message: String,
}

impl Notification {
    pub fn new(
        level: NotificationLevel,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Broadcast bus for notifications.
#[derive(Clone)]
pub struct NotificationBus {
    sender: Arc<broadcast::Sender<Notification>>,
}

impl NotificationBus {
    /// Capacity bounds how many unconsumed notifications are buffered
    /// before old ones are dropped.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish(&self, notification: Notification) {
        debug!(code = %notification.code, "Publishing notification");
        // send() only fails with zero receivers, which is fine.
        let _ = self.sender.send(notification);
    }

    pub fn info(&self, code: &str, message: impl Into<String>) {
        self.publish(Notification::new(NotificationLevel::Info, code, message));
    }

    pub fn success(&self, code: &str, message: impl Into<String>) {
        self.publish(Notification::new(NotificationLevel::Success, code, message));
    }

    pub fn warning(&self, code: &str, message: impl Into<String>) {
        self.publish(Notification::new(NotificationLevel::Warning, code, message));
    }

    pub fn error(&self, code: &str, message: impl Into<String>) {
        self.publish(Notification::new(NotificationLevel::Error, code, message));
    }

    pub fn subscribe(&self) -> NotificationReceiver {
        NotificationReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

pub struct NotificationReceiver {
    receiver: broadcast::Receiver<Notification>,
}

impl NotificationReceiver {
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) => return Some(notification),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Notification receiver lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.try_recv() {
                Ok(notification) => return Some(notification),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Notification receiver lagged by {} events", n);
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = NotificationBus::with_default_capacity();
        let mut rx = bus.subscribe();

        bus.warning("schema_mismatch", "version drift");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.level, NotificationLevel::Warning);
        assert_eq!(event.code, "schema_mismatch");
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = NotificationBus::with_default_capacity();
        bus.error("load_error", "nobody listening");
        assert_eq!(bus.subscriber_count(), 0);
    }
}
