//! Envelope construction for outgoing webhook payloads.
//!
//! Each known event type has a template naming the payload fields worth
//! forwarding; everything else falls back to a generic envelope wrapping the
//! raw event data. The shaped envelope is built once per event and shared by
//! every fan-out delivery; `timestamp` and `delivery_id` are overwritten per
//! delivery at finalization and never derived from domain data.

use bytes::Bytes;
use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::{Map, Value};
use tasklane_core::{event_types, Clock, DeliveryId, EventType};

use crate::error::{DeliveryError, Result};

/// The JSON structure actually transmitted to a subscriber.
///
/// A thin wrapper over a JSON object. Always carries `event`, `timestamp`
/// and `delivery_id` after finalization, plus the event-specific fields its
/// template selected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadEnvelope {
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl PayloadEnvelope {
    /// Stamps the dispatcher-controlled fields onto the envelope.
    ///
    /// Overwrites unconditionally: whatever `timestamp` or `delivery_id` the
    /// domain payload carried, the delivered envelope gets a fresh RFC 3339
    /// timestamp and the collision-resistant ID of this delivery.
    pub fn finalize(&mut self, delivery_id: DeliveryId, clock: &dyn Clock) {
        self.fields.insert(
            "timestamp".to_string(),
            Value::String(clock.now_utc().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        self.fields.insert("delivery_id".to_string(), Value::String(delivery_id.to_string()));
    }

    /// Serializes the envelope to the bytes that go on the wire.
    ///
    /// Must be called after [`finalize`](Self::finalize); the returned bytes
    /// are what gets signed and what every retry of the delivery re-sends
    /// verbatim.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the payload cannot be serialized.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let bytes = serde_json::to_vec(&self.fields)
            .map_err(|e| DeliveryError::configuration(format!("unserializable envelope: {e}")))?;
        Ok(Bytes::from(bytes))
    }

    /// Read access to an envelope field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Builds payload envelopes from typed domain events.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadBuilder;

impl PayloadBuilder {
    /// Creates a payload builder.
    pub fn new() -> Self {
        Self
    }

    /// Shapes the envelope for an event, without the per-delivery fields.
    ///
    /// Known event types keep only the fields their template names; fields
    /// absent from the event data are skipped. Unknown event types get the
    /// generic `{ event, data }` envelope so no producer payload is ever
    /// silently lost.
    pub fn shape(&self, event_type: &EventType, data: &Value) -> PayloadEnvelope {
        let mut fields = Map::new();
        fields.insert("event".to_string(), Value::String(event_type.to_string()));

        match template_for(event_type) {
            Some(keys) => {
                if let Value::Object(source) = data {
                    for key in keys {
                        if let Some(value) = source.get(*key) {
                            fields.insert((*key).to_string(), value.clone());
                        }
                    }
                }
            },
            None => {
                fields.insert("data".to_string(), data.clone());
            },
        }

        PayloadEnvelope { fields }
    }
}

/// Fields forwarded for each known event type.
fn template_for(event_type: &EventType) -> Option<&'static [&'static str]> {
    let keys: &[&str] = match event_type.as_str() {
        event_types::TASK_CREATED | event_types::TASK_DELETED => &["task", "user", "project"],
        event_types::TASK_UPDATED => &["task", "changes", "user", "project"],
        event_types::TASK_STATUS_CHANGED => {
            &["task", "old_status", "new_status", "user", "project"]
        },
        event_types::COMMENT_CREATED => &["comment", "task", "user", "project"],
        event_types::PROJECT_UPDATED => &["project", "changes", "user"],
        event_types::MEMBER_ADDED => &["project", "member", "added_by"],
        event_types::MEMBER_REMOVED => &["project", "member", "removed_by"],
        event_types::MEMBER_ROLE_CHANGED => {
            &["project", "member", "old_role", "new_role", "changed_by"]
        },
        _ => return None,
    };
    Some(keys)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use serde_json::json;
    use tasklane_core::TestClock;

    use super::*;

    #[test]
    fn known_type_keeps_template_fields_only() {
        let builder = PayloadBuilder::new();
        let data = json!({
            "task": {"id": 1, "title": "ship it"},
            "user": {"id": 2},
            "project": {"id": 3},
            "internal_audit_blob": {"rows": 900},
        });

        let envelope = builder.shape(&EventType::from(event_types::TASK_CREATED), &data);

        assert_eq!(envelope.get("event"), Some(&json!("task.created")));
        assert_eq!(envelope.get("task"), Some(&json!({"id": 1, "title": "ship it"})));
        assert_eq!(envelope.get("user"), Some(&json!({"id": 2})));
        assert_eq!(envelope.get("project"), Some(&json!({"id": 3})));
        assert_eq!(envelope.get("internal_audit_blob"), None);
        assert_eq!(envelope.get("data"), None);
    }

    #[test]
    fn status_change_carries_old_and_new_status() {
        let builder = PayloadBuilder::new();
        let data = json!({
            "task": {"id": 1},
            "old_status": "todo",
            "new_status": "done",
            "user": {"id": 2},
            "project": {"id": 3},
        });

        let envelope = builder.shape(&EventType::from(event_types::TASK_STATUS_CHANGED), &data);

        assert_eq!(envelope.get("old_status"), Some(&json!("todo")));
        assert_eq!(envelope.get("new_status"), Some(&json!("done")));
    }

    #[test]
    fn unknown_type_falls_back_to_generic_envelope() {
        let builder = PayloadBuilder::new();
        let data = json!({"anything": [1, 2, 3]});

        let envelope = builder.shape(&EventType::from("sprint.archived"), &data);

        assert_eq!(envelope.get("event"), Some(&json!("sprint.archived")));
        assert_eq!(envelope.get("data"), Some(&data));
    }

    #[test]
    fn missing_template_fields_are_skipped() {
        let builder = PayloadBuilder::new();
        let data = json!({"task": {"id": 1}});

        let envelope = builder.shape(&EventType::from(event_types::TASK_CREATED), &data);

        assert_eq!(envelope.get("task"), Some(&json!({"id": 1})));
        assert_eq!(envelope.get("user"), None);
        assert_eq!(envelope.get("project"), None);
    }

    #[test]
    fn finalize_overwrites_domain_supplied_fields() {
        let builder = PayloadBuilder::new();
        let clock = TestClock::with_start_time(UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        let data = json!({
            "timestamp": "1999-01-01T00:00:00Z",
            "delivery_id": "spoofed",
        });

        let mut envelope = builder.shape(&EventType::from("custom.event"), &data);
        let delivery_id = DeliveryId::new();
        envelope.finalize(delivery_id, &clock);

        assert_eq!(envelope.get("delivery_id"), Some(&json!(delivery_id.to_string())));
        let timestamp = envelope.get("timestamp").and_then(Value::as_str).expect("timestamp");
        assert!(timestamp.starts_with("2023-11-14T"));
        // The spoofed values survive only inside the wrapped data
        assert_eq!(envelope.get("data").unwrap()["delivery_id"], json!("spoofed"));
    }

    #[test]
    fn serialized_bytes_are_stable_for_a_delivery() {
        let builder = PayloadBuilder::new();
        let clock = TestClock::new();

        let mut envelope =
            builder.shape(&EventType::from(event_types::TASK_CREATED), &json!({"task": {}}));
        envelope.finalize(DeliveryId::new(), &clock);

        let first = envelope.to_bytes().unwrap();
        clock.advance(Duration::from_secs(60));
        let second = envelope.to_bytes().unwrap();
        assert_eq!(first, second);
    }
}
