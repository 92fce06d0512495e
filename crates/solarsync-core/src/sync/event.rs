//! Change events as delivered by the `/updates` feeds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::model::{EntityId, EntityKind, EntityRef};

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Created,
    Updated,
    Deleted,
    #[serde(alias = "status-changed", alias = "statusChanged")]
    StatusChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(default)]
    pub updated_by: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One server-side change observed by the poller.
///
/// `snapshot` may be partial; the reconciler decides whether it is enough to
/// stand in for the full object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub entity_id: EntityId,
    pub entity_type: EntityKind,
    pub update_type: UpdateType,
    #[serde(default, alias = "data")]
    pub snapshot: Map<String, Value>,
    pub metadata: EventMetadata,
}

impl ChangeEvent {
    #[must_use]
    pub fn entity(&self) -> EntityRef {
        EntityRef::new(self.entity_type, self.entity_id.clone())
    }

    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.metadata.timestamp
    }

    /// Identity used for duplicate suppression.
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            entity: self.entity(),
            timestamp: self.metadata.timestamp,
            update_type: self.update_type,
        }
    }

    /// Status carried by the payload, if any.
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.snapshot.get("status").and_then(Value::as_str)
    }

    /// Decode the `data` array of an updates response.
    ///
    /// Items that do not parse are logged and skipped so one bad record does
    /// not stall the feed. A payload that is not an array yields nothing.
    #[must_use]
    pub fn parse_batch(data: Option<&Value>) -> Vec<Self> {
        let items = match data {
            Some(Value::Array(items)) => items.as_slice(),
            Some(Value::Null) | None => return Vec::new(),
            Some(other) => {
                warn!(payload = %other, "updates payload is not an array");
                return Vec::new();
            }
        };
        items
            .iter()
            .filter_map(|item| match Self::deserialize(item) {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!(%err, "skipping malformed change event");
                    None
                }
            })
            .collect()
    }
}

/// `(entity, timestamp, update type)`; two events with the same key describe
/// the same change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub entity: EntityRef,
    pub timestamp: DateTime<Utc>,
    pub update_type: UpdateType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_wire_event() {
        let raw = json!({
            "entityId": "p1",
            "entityType": "project",
            "updateType": "status_changed",
            "snapshot": {"status": "on_hold"},
            "metadata": {"updatedBy": "dana", "timestamp": "2026-05-01T10:00:00Z"}
        });
        let event: ChangeEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.entity(), EntityRef::project("p1"));
        assert_eq!(event.update_type, UpdateType::StatusChanged);
        assert_eq!(event.status(), Some("on_hold"));
        assert_eq!(event.metadata.updated_by.as_deref(), Some("dana"));
    }

    #[test]
    fn batch_skips_bad_items() {
        let data = json!([
            {"entityId": "r1", "entityType": "daily_report", "updateType": "created",
             "metadata": {"timestamp": "2026-05-01T10:00:00Z"}},
            {"entityId": "r2", "entityType": "invoice", "updateType": "created",
             "metadata": {"timestamp": "2026-05-01T10:00:00Z"}},
            "garbage"
        ]);
        let events = ChangeEvent::parse_batch(Some(&data));
        assert_eq!(events.len(), 1);
        assert!(events[0].snapshot.is_empty());
        assert!(ChangeEvent::parse_batch(Some(&json!({"oops": 1}))).is_empty());
        assert!(ChangeEvent::parse_batch(None).is_empty());
    }

    #[test]
    fn dedup_key_ignores_payload_and_actor() {
        let a: ChangeEvent = serde_json::from_value(json!({
            "entityId": "p1", "entityType": "project", "updateType": "updated",
            "snapshot": {"name": "A"},
            "metadata": {"updatedBy": "x", "timestamp": "2026-05-01T10:00:00Z"}
        }))
        .unwrap();
        let mut b = a.clone();
        b.snapshot.insert("name".into(), json!("B"));
        b.metadata.updated_by = Some("y".into());
        assert_eq!(a.dedup_key(), b.dedup_key());

        b.update_type = UpdateType::StatusChanged;
        assert_ne!(a.dedup_key(), b.dedup_key());
    }
}
