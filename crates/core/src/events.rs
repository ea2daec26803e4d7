//! Target lifecycle notifications
//!
//! Components that observe targets (discovery, recording management) publish
//! [`TargetEvent`]s on an [`EventBus`]; caches subscribe and invalidate whatever
//! the event makes stale. Publishing never blocks and never fails when nobody is
//! listening.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::trace;

/// Lifecycle events concerning a target or one of its recordings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetEvent {
    /// A recording on the target finished or was stopped
    RecordingStopped {
        target_id: String,
        recording_name: String,
    },
    /// A recording was deleted from the target
    RecordingDeleted {
        target_id: String,
        recording_name: String,
    },
    /// The target disappeared; any session to it is dead
    TargetLost { target_id: String },
}

impl TargetEvent {
    #[must_use]
    pub fn target_id(&self) -> &str {
        match self {
            TargetEvent::RecordingStopped { target_id, .. }
            | TargetEvent::RecordingDeleted { target_id, .. }
            | TargetEvent::TargetLost { target_id } => target_id,
        }
    }

    /// The recording this event concerns, if it concerns a single recording
    #[must_use]
    pub fn recording_name(&self) -> Option<&str> {
        match self {
            TargetEvent::RecordingStopped { recording_name, .. }
            | TargetEvent::RecordingDeleted { recording_name, .. } => Some(recording_name),
            TargetEvent::TargetLost { .. } => None,
        }
    }
}

/// Event with the time it was published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event: TargetEvent,
    pub timestamp: SystemTime,
}

/// Publish/subscribe feed of [`TargetEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PublishedEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: TargetEvent) {
        let published = PublishedEvent {
            event,
            timestamp: SystemTime::now(),
        };
        if self.sender.send(published).is_err() {
            trace!("Target event published with no subscribers");
        }
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active receivers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.receiver_count(), 1);

        bus.publish(TargetEvent::RecordingStopped {
            target_id: "t1".into(),
            recording_name: "continuous".into(),
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event.target_id(), "t1");
        assert_eq!(received.event.recording_name(), Some("continuous"));
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let bus = EventBus::default();
        bus.publish(TargetEvent::TargetLost {
            target_id: "gone".into(),
        });
        assert_eq!(bus.receiver_count(), 0);
    }
}
