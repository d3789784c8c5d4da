// Domain Event Model

use serde::{Deserialize, Serialize};

/// Event ID (UUID v4)
pub type EventId = String;

/// Immutable record of something that happened in the domain.
///
/// The payload is owned JSON so handlers running after the originating
/// transaction never see live domain objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    event_id: EventId,
    event_type: String,
    occurred_at: i64, // epoch ms
    payload: serde_json::Value,
}

impl DomainEvent {
    /// Create an event stamped with a fresh UUID and the current wall clock
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::with_identity(
            uuid::Uuid::new_v4().to_string(),
            chrono::Utc::now().timestamp_millis(),
            event_type,
            payload,
        )
    }

    /// Create an event with injected id and timestamp (deterministic tests, replays from outbox)
    pub fn with_identity(
        event_id: impl Into<String>,
        occurred_at: i64,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> i64 {
        self.occurred_at
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Read one top-level payload field as a string
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}

/// Events recorded by an aggregate and not yet published
#[derive(Debug, Default, Clone)]
pub struct PendingEvents {
    events: Vec<DomainEvent>,
}

impl PendingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    /// Hand over every pending event, leaving the buffer empty
    pub fn take(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DomainEvent> {
        self.events.iter()
    }
}

/// Anything that buffers domain events until they are explicitly published
pub trait EventSource {
    fn take_pending_events(&mut self) -> Vec<DomainEvent>;
}

impl EventSource for PendingEvents {
    fn take_pending_events(&mut self) -> Vec<DomainEvent> {
        self.take()
    }
}
