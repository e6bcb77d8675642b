use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::types::EventId;

/// A single trackable occurrence flowing through the dispatch pipeline.
///
/// The payload is an ordered-insertion mapping from string keys to scalar or
/// array values. Events are immutable once constructed except through
/// [`merged`](Self::merged), which produces a copy with extra data folded in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackEvent {
    /// Unique event identifier.
    pub id: EventId,

    /// Event name, used for bypass-key matching and enrichment lookup.
    pub name: String,

    /// Ordered key-value payload. Values are strings, numbers, booleans, or
    /// arrays of the same; the pipeline never interprets them beyond the keys
    /// it owns.
    pub payload: Map<String, Value>,

    /// Timestamp when the event was created.
    pub created_at: DateTime<Utc>,

    /// When set, the event skips all batching checks and is delivered
    /// immediately. Set on events resubmitted by a queue release so they
    /// cannot re-enter the queue.
    #[serde(default)]
    pub bypass_queue: bool,

    /// When set, the insufficient-battery check does not apply.
    #[serde(default)]
    pub bypass_battery: bool,

    /// Marks consent auditing and bridge-sync events. The consent gate passes
    /// marked events through unconditionally so the pipeline can always
    /// report the decision that would otherwise block it.
    #[serde(default)]
    pub audit: bool,
}

impl TrackEvent {
    /// Create a new event with a generated id and `created_at` set to now.
    #[must_use]
    pub fn new(name: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            id: EventId::generate(),
            name: name.into(),
            payload,
            created_at: Utc::now(),
            bypass_queue: false,
            bypass_battery: false,
            audit: false,
        }
    }

    /// Mark the event to bypass the queue (immediate delivery).
    #[must_use]
    pub fn with_bypass_queue(mut self) -> Self {
        self.bypass_queue = true;
        self
    }

    /// Mark the event to bypass the battery check.
    #[must_use]
    pub fn with_bypass_battery(mut self) -> Self {
        self.bypass_battery = true;
        self
    }

    /// Mark the event as a consent auditing event.
    #[must_use]
    pub fn with_audit(mut self) -> Self {
        self.audit = true;
        self
    }

    /// Look up a payload value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Look up a payload value by key, as a string slice.
    #[must_use]
    pub fn string_value(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Return a copy of this event with `data` merged into the payload.
    /// Keys already present are overwritten (last write wins).
    #[must_use]
    pub fn merged(&self, data: &Map<String, Value>) -> Self {
        let mut event = self.clone();
        for (key, value) in data {
            event.payload.insert(key.clone(), value.clone());
        }
        event
    }
}

/// An ordered bundle of events sharing a single delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    /// Unique batch identifier.
    pub id: String,

    /// The events in this batch, in queue order.
    pub events: Vec<TrackEvent>,

    /// Timestamp when the batch was assembled.
    pub created_at: DateTime<Utc>,
}

impl EventBatch {
    /// Assemble a batch from a sequence of events.
    #[must_use]
    pub fn new(events: Vec<TrackEvent>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            events,
            created_at: Utc::now(),
        }
    }

    /// Number of events in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Return `true` if the batch contains no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn event_creation() {
        let event = TrackEvent::new("screen_view", payload(&[("screen", json!("home"))]));
        assert_eq!(event.name, "screen_view");
        assert_eq!(event.string_value("screen"), Some("home"));
        assert!(!event.bypass_queue);
        assert!(!event.audit);
    }

    #[test]
    fn merged_overwrites_and_preserves_original() {
        let event = TrackEvent::new("purchase", payload(&[("amount", json!(10))]));
        let extra = payload(&[("amount", json!(20)), ("currency", json!("EUR"))]);

        let merged = event.merged(&extra);
        assert_eq!(merged.get("amount"), Some(&json!(20)));
        assert_eq!(merged.string_value("currency"), Some("EUR"));
        // Original is untouched.
        assert_eq!(event.get("amount"), Some(&json!(10)));
        assert!(event.get("currency").is_none());
        // Identity survives the copy.
        assert_eq!(merged.id, event.id);
    }

    #[test]
    fn payload_preserves_insertion_order() {
        let mut map = Map::new();
        map.insert("z".into(), json!(1));
        map.insert("a".into(), json!(2));
        map.insert("m".into(), json!(3));
        let event = TrackEvent::new("ordered", map);

        let keys: Vec<&str> = event.payload.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn event_serde_roundtrip() {
        let event = TrackEvent::new("launch", payload(&[("cold_start", json!(true))]))
            .with_bypass_queue();
        let json = serde_json::to_string(&event).unwrap();
        let back: TrackEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        assert_eq!(back.payload, event.payload);
        assert!(back.bypass_queue);
    }

    #[test]
    fn batch_assembly() {
        let events = vec![
            TrackEvent::new("a", Map::new()),
            TrackEvent::new("b", Map::new()),
        ];
        let batch = EventBatch::new(events);
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
        assert_eq!(batch.events[0].name, "a");
        assert_eq!(batch.events[1].name, "b");
    }
}
