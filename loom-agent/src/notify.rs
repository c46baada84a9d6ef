use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    pub level: NotifyLevel,
}

/// Fire-and-forget user notification. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, level: NotifyLevel);
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str, level: NotifyLevel) {
        match level {
            NotifyLevel::Error => tracing::error!(%message, "notification"),
            NotifyLevel::Warning => tracing::warn!(%message, "notification"),
            NotifyLevel::Info | NotifyLevel::Success => {
                tracing::info!(%message, level = ?level, "notification")
            }
        }
    }
}

/// Forwards notifications to a UI task. A closed receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new(tx: UnboundedSender<Notification>) -> Self {
        Self { tx }
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, message: &str, level: NotifyLevel) {
        let sent = self.tx.send(Notification {
            message: message.to_string(),
            level,
        });
        if sent.is_err() {
            tracing::debug!("notification receiver dropped");
        }
    }
}
