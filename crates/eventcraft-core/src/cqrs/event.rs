//! Wire-format domain event and its saga metadata block.
//!
//! This is the envelope every engine persists, projects, and republishes.
//! Domain payloads ride along as an untyped JSON map so field addition stays
//! backward-compatible: old consumers simply ignore fields they don't know
//! about.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::Event;

/// Marker trait giving an event type its dotted wire name (e.g.
/// `"customer.created"`). Required by backends that key storage or topic
/// routing off the event's logical type rather than its Rust type.
pub trait EventTypeName: Event {
    /// Dotted name, at most 128 characters, used on the wire and as the
    /// event bus topic. Defaults to the Rust type name; override to pin a
    /// stable wire name independent of refactoring.
    fn event_type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Saga correlation carried by events that participate in a workflow.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SagaMetadata {
    /// Identifier of the saga instance this event belongs to.
    pub saga_id: Option<String>,
    /// Name of the saga definition/type.
    pub saga_type: Option<String>,
    /// Step index within the saga, 0 when absent.
    #[serde(default)]
    pub step_number: i32,
    /// True when this event represents a compensating action.
    #[serde(default)]
    pub is_compensating: bool,
}

impl SagaMetadata {
    /// No saga association.
    pub fn none() -> Self {
        Self::default()
    }

    /// Metadata for the given saga, at the given step.
    pub fn for_step(saga_id: impl Into<String>, saga_type: impl Into<String>, step: i32) -> Self {
        Self {
            saga_id: Some(saga_id.into()),
            saga_type: Some(saga_type.into()),
            step_number: step,
            is_compensating: false,
        }
    }

    /// Same saga/step, marked as a compensating event.
    pub fn compensating(mut self) -> Self {
        self.is_compensating = true;
        self
    }
}

/// The engine's wire-format event envelope.
///
/// `key` is the domain key the event is filed under in the Event Log and
/// View Store; `payload` carries domain-specific fields as a JSON object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DomainEvent {
    /// 128-bit UUID identifying this event instance.
    pub event_id: Uuid,
    /// Dotted event type name, e.g. `"customer.created"`.
    pub event_type: String,
    /// Semver-like schema version, default `"1.0"`.
    #[serde(default = "default_event_version")]
    pub event_version: String,
    /// Name of the domain engine that produced this event.
    pub source: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Domain key this event is filed under.
    pub key: String,
    /// Correlation id tying this event to the originating command/saga.
    pub correlation_id: Uuid,
    /// Saga metadata, present only for saga-participating events.
    #[serde(default)]
    pub saga: SagaMetadata,
    /// Domain-specific payload fields.
    #[serde(default)]
    pub payload: HashMap<String, Value>,
}

fn default_event_version() -> String {
    "1.0".to_string()
}

impl DomainEvent {
    /// Build a new event with a fresh `eventId` and the current wall-clock
    /// timestamp.
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        key: impl Into<String>,
        correlation_id: Uuid,
        payload: HashMap<String, Value>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            event_version: default_event_version(),
            source: source.into(),
            timestamp: chrono_now_millis(),
            key: key.into(),
            correlation_id,
            saga: SagaMetadata::none(),
            payload,
        }
    }

    /// Attach saga metadata, returning the modified event.
    pub fn with_saga(mut self, saga: SagaMetadata) -> Self {
        self.saga = saga;
        self
    }

    /// Override the generated `eventId`, e.g. with a caller-supplied
    /// idempotency key so a resubmission of the same logical command can be
    /// recognized as a duplicate at ingress.
    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = event_id;
        self
    }

    /// Read a payload field as a string, if present and of that type.
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }

    /// Read a payload field as an i64, if present and of that type.
    pub fn payload_i64(&self, field: &str) -> Option<i64> {
        self.payload.get(field).and_then(Value::as_i64)
    }
}

impl Event for DomainEvent {}

impl EventTypeName for DomainEvent {
    fn event_type_name() -> &'static str {
        "domain.event"
    }
}

fn chrono_now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saga_metadata_defaults_are_wire_safe() {
        let meta = SagaMetadata::none();
        assert_eq!(meta.step_number, 0);
        assert!(!meta.is_compensating);
    }

    #[test]
    fn compensating_flips_flag_only() {
        let meta = SagaMetadata::for_step("s1", "OrderSaga", 2).compensating();
        assert_eq!(meta.saga_id.as_deref(), Some("s1"));
        assert_eq!(meta.step_number, 2);
        assert!(meta.is_compensating);
    }

    #[test]
    fn round_trips_through_json() {
        let mut payload = HashMap::new();
        payload.insert("name".to_string(), Value::String("Alice".to_string()));

        let event = DomainEvent::new(
            "customer.created",
            "customer-engine",
            "c1",
            Uuid::new_v4(),
            payload,
        );

        let json = serde_json::to_string(&event).unwrap();
        let back: DomainEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(back.event_id, event.event_id);
        assert_eq!(back.event_type, "customer.created");
        assert_eq!(back.key, "c1");
        assert_eq!(back.payload_str("name"), Some("Alice"));
    }
}
