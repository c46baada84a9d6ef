use super::cycle::OodaPhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Started,
    Progress,
    Completed,
    Failed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Progress => "progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Live progress for observers. Delivery is best effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OodaEvent {
    pub cycle_id: String,
    pub phase: OodaPhase,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Fan-out to any number of unbounded subscribers. Subscribers that went away are pruned.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<UnboundedSender<OodaEvent>>>,
}

impl EventBus {
    pub(crate) fn subscribe(&self) -> UnboundedReceiver<OodaEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.subscribers.lock() {
            Ok(mut subs) => subs.push(tx),
            Err(poisoned) => poisoned.into_inner().push(tx),
        }
        rx
    }

    pub(crate) fn emit(&self, event: OodaEvent) {
        tracing::debug!(
            cycle_id = %event.cycle_id,
            phase = %event.phase,
            kind = ?event.kind,
            message = %event.message,
            "ooda event"
        );
        let mut subs = match self.subscribers.lock() {
            Ok(subs) => subs,
            Err(poisoned) => poisoned.into_inner(),
        };
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind) -> OodaEvent {
        OodaEvent {
            cycle_id: "c1".to_string(),
            phase: OodaPhase::Observe,
            kind,
            message: "observing".to_string(),
            timestamp: Utc::now(),
            data: None,
        }
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned_and_others_still_receive() {
        let bus = EventBus::default();
        let mut kept = bus.subscribe();
        drop(bus.subscribe());

        bus.emit(event(EventKind::Started));
        bus.emit(event(EventKind::Completed));

        assert_eq!(kept.recv().await.unwrap().kind, EventKind::Started);
        assert_eq!(kept.recv().await.unwrap().kind, EventKind::Completed);
        assert_eq!(bus.subscribers.lock().unwrap().len(), 1);
    }

    #[test]
    fn event_serializes_kind_as_type() {
        let v = serde_json::to_value(event(EventKind::Progress)).unwrap();
        assert_eq!(v["type"], "progress");
        assert_eq!(v["phase"], "observe");
    }
}
