//! Domain event system: decoupled communication between bounded contexts.
//!
//! The pipeline publishes an event at each milestone of a turn. Subscribers
//! (logging sinks, dashboards, tests) react without coupling to the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// An inbound message entered the pipeline
    MessageReceived {
        routing_key: String,
        sender_id: String,
        content_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A new session was opened for an instance
    SessionStarted {
        session_id: String,
        instance_id: String,
        channel_type: String,
        timestamp: DateTime<Utc>,
    },

    /// Older messages were folded into the session summary
    SessionCompacted {
        session_id: String,
        compacted_messages: usize,
        timestamp: DateTime<Utc>,
    },

    /// Memories were extracted from a user message
    MemoriesExtracted {
        instance_id: String,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A reply reached the channel
    ResponseDelivered {
        session_id: String,
        instance_id: String,
        skill: Option<String>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The pipeline stopped early or failed
    PipelineFailed {
        routing_key: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::SessionCompacted {
            session_id: "s-1".into(),
            compacted_messages: 12,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::SessionCompacted {
                session_id,
                compacted_messages,
                ..
            } => {
                assert_eq!(session_id, "s-1");
                assert_eq!(*compacted_messages, 12);
            }
            _ => panic!("Expected SessionCompacted event"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::PipelineFailed {
            routing_key: "cli:local:me".into(),
            reason: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }
}
