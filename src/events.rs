//! Change notifications for views that need to re-read the store.
//!
//! Events carry enough context to route them, but listeners are expected to
//! re-fetch the records they display rather than apply the payload as a diff.

use crate::models::{PatientTherapyProgress, ProgressSummary};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProgressEvent {
    /// Some module activity was saved.
    DataChanged,
    #[serde(rename_all = "camelCase")]
    TherapyProgressUpdated {
        user_id: String,
        progress: PatientTherapyProgress,
    },
    #[serde(rename_all = "camelCase")]
    PatientProgressUpdate {
        therapist_id: String,
        progress_summary: ProgressSummary,
    },
}

impl ProgressEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DataChanged => "dataChanged",
            Self::TherapyProgressUpdated { .. } => "therapyProgressUpdated",
            Self::PatientProgressUpdate { .. } => "patientProgressUpdate",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: ProgressEvent) {
        trace!(event = event.name(), "publishing");
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(ProgressEvent::DataChanged);
    }

    #[test]
    fn every_subscriber_sees_each_event() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        bus.publish(ProgressEvent::DataChanged);

        assert!(matches!(first.try_recv(), Ok(ProgressEvent::DataChanged)));
        assert!(matches!(second.try_recv(), Ok(ProgressEvent::DataChanged)));
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let value = serde_json::to_value(ProgressEvent::DataChanged).unwrap();
        assert_eq!(value["type"], "dataChanged");
    }
}
