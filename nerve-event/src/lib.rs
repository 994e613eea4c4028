//! Nerve Event Model
//!
//! This module defines the event structure flowing through the aggregation engine.
//! Events are immutable once built; the engine shares them behind `Arc`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Event type used when a producer does not supply one
pub const UNKNOWN_EVENT_TYPE: &str = "unknown";

/// Event metadata (ordered so snapshots serialize deterministically)
pub type Metadata = BTreeMap<String, Value>;

/// Represents a single event in the system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier
    pub id: String,

    /// Event type (used for bucketing and correlation)
    pub event_type: String,

    /// Unix timestamp in seconds
    pub timestamp: i64,

    /// Optional numeric payload
    pub value: Option<f64>,

    /// Free-form metadata
    pub metadata: Metadata,

    /// Whether this event is a synthetic parent summarizing child events
    pub hierarchical: bool,
}

impl Event {
    /// Create a new event with a generated id
    pub fn new(event_type: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: generate_id(),
            event_type: event_type.into(),
            timestamp,
            value: None,
            metadata: Metadata::new(),
            hierarchical: false,
        }
    }

    /// Set the numeric value
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Numeric value usable in aggregations.
    ///
    /// Non-finite values are treated as non-numeric.
    pub fn numeric_value(&self) -> Option<f64> {
        self.value.filter(|v| v.is_finite())
    }

    /// Create an event builder
    pub fn builder() -> EventBuilder {
        EventBuilder::default()
    }
}

/// Event builder for convenient event construction
///
/// Missing fields fall back to producer-friendly defaults: a fresh id,
/// the `unknown` type and the current time.
#[derive(Debug, Default, Clone)]
pub struct EventBuilder {
    id: Option<String>,
    event_type: Option<String>,
    timestamp: Option<i64>,
    value: Option<f64>,
    metadata: Metadata,
    hierarchical: bool,
}

impl EventBuilder {
    /// Set event id
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set event type
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Set timestamp (unix seconds)
    pub fn timestamp(mut self, ts: i64) -> Self {
        self.timestamp = Some(ts);
        self
    }

    /// Set numeric value
    pub fn value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    /// Add a metadata entry
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merge a whole metadata map
    pub fn extend_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Mark the event as hierarchical
    pub fn hierarchical(mut self, hierarchical: bool) -> Self {
        self.hierarchical = hierarchical;
        self
    }

    /// Build the event, stamping it with the system clock if no timestamp was set
    pub fn build(self) -> Event {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        self.build_at(now)
    }

    /// Build the event, using `now_secs` if no timestamp was set
    pub fn build_at(self, now_secs: i64) -> Event {
        Event {
            id: self.id.unwrap_or_else(generate_id),
            event_type: self
                .event_type
                .unwrap_or_else(|| UNKNOWN_EVENT_TYPE.to_string()),
            timestamp: self.timestamp.unwrap_or(now_secs),
            value: self.value,
            metadata: self.metadata,
            hierarchical: self.hierarchical,
        }
    }

    /// Start a builder from a loosely-shaped JSON object sent by a producer.
    ///
    /// Recognized keys are `id`, `type`, `timestamp`, `value`, `metadata` and
    /// `hierarchical`. A non-numeric `value` is ignored rather than rejected.
    pub fn from_json(json: &Value) -> Result<Self, EventError> {
        let obj = json.as_object().ok_or(EventError::NotAnObject)?;
        let mut builder = EventBuilder::default();

        if let Some(id) = obj.get("id").and_then(Value::as_str) {
            builder = builder.id(id);
        }
        if let Some(event_type) = obj.get("type").and_then(Value::as_str) {
            builder = builder.event_type(event_type);
        }
        if let Some(ts) = obj.get("timestamp") {
            let ts = ts
                .as_i64()
                .or_else(|| ts.as_f64().and_then(float_timestamp))
                .ok_or(EventError::InvalidField("timestamp"))?;
            builder = builder.timestamp(ts);
        }
        if let Some(value) = obj.get("value").and_then(Value::as_f64) {
            builder = builder.value(value);
        }
        match obj.get("metadata") {
            Some(Value::Object(map)) => {
                builder = builder.extend_metadata(
                    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                );
            }
            Some(Value::Null) | None => {}
            Some(_) => return Err(EventError::InvalidField("metadata")),
        }
        if let Some(flag) = obj.get("hierarchical").and_then(Value::as_bool) {
            builder = builder.hierarchical(flag);
        }

        Ok(builder)
    }
}

// Whole seconds of a fractional timestamp, if it fits in an i64
fn float_timestamp(secs: f64) -> Option<i64> {
    let secs = secs.floor();
    (secs.is_finite() && secs >= i64::MIN as f64 && secs < i64::MAX as f64).then(|| secs as i64)
}

/// Generate a fresh event id
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Error decoding an event
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Event payload must be a JSON object")]
    NotAnObject,

    #[error("Invalid field: {0}")]
    InvalidField(&'static str),
}
