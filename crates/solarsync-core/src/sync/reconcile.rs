//! Turns polled change events into notifications and store updates.
//!
//! The notification log is bounded: once it holds more than `cap` entries
//! the oldest are evicted first, except entries about an entity that is
//! pinned by an in-flight user action. Duplicate suppression covers the
//! events whose notifications are still in the log.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace};

use super::event::{ChangeEvent, DedupKey, UpdateType};
use crate::model::{EntityRef, EntitySnapshot};
use crate::store::EntityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    EntityCreated,
    EntityUpdated,
    EntityDeleted,
    EntityStatusChanged,
}

impl From<UpdateType> for NotificationType {
    fn from(value: UpdateType) -> Self {
        match value {
            UpdateType::Created => Self::EntityCreated,
            UpdateType::Updated => Self::EntityUpdated,
            UpdateType::Deleted => Self::EntityDeleted,
            UpdateType::StatusChanged => Self::EntityStatusChanged,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub entity: EntityRef,
    pub entity_name: Option<String>,
    pub actor: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub read: bool,
}

/// What one [`NotificationReconciler::ingest`] call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Ids of notifications appended, in order.
    pub appended: Vec<u64>,
    pub duplicates: usize,
    pub evicted: usize,
    pub upserted: Vec<EntityRef>,
    pub removed: Vec<EntityRef>,
    /// Entities whose event payload was too thin to store; fetch these.
    pub fetch: Vec<EntityRef>,
}

#[derive(Debug)]
struct Entry {
    key: DedupKey,
    notification: Notification,
}

#[derive(Debug)]
pub struct NotificationReconciler {
    store: EntityStore,
    cap: usize,
    log: VecDeque<Entry>,
    window: HashSet<DedupKey>,
    pinned: HashMap<EntityRef, usize>,
    next_id: u64,
}

impl NotificationReconciler {
    #[must_use]
    pub fn new(store: EntityStore, cap: usize) -> Self {
        Self {
            store,
            cap: cap.max(1),
            log: VecDeque::new(),
            window: HashSet::new(),
            pinned: HashMap::new(),
            next_id: 0,
        }
    }

    #[must_use]
    pub const fn cap(&self) -> usize {
        self.cap
    }

    /// Reconcile a batch of events.
    ///
    /// Events are processed in the order given. For each non-duplicate event
    /// one notification is appended and the store is updated:
    ///
    /// - `deleted` removes the entity;
    /// - otherwise the payload is merged onto the stored snapshot, or stored
    ///   as-is when it carries every required field;
    /// - failing both, the entity is listed in [`IngestReport::fetch`].
    pub fn ingest(&mut self, events: &[ChangeEvent]) -> IngestReport {
        let mut report = IngestReport::default();
        for event in events {
            let key = event.dedup_key();
            if self.window.contains(&key) {
                trace!(entity = %key.entity, "duplicate change event");
                report.duplicates += 1;
                continue;
            }

            // Named before folding so deletions still carry the last known name.
            let notification = self.notification_for(event);
            self.fold_into_store(event, &mut report);

            report.appended.push(notification.id);
            self.window.insert(key.clone());
            self.log.push_back(Entry { key, notification });
        }
        report.evicted = self.evict();
        if !report.appended.is_empty() {
            debug!(
                appended = report.appended.len(),
                duplicates = report.duplicates,
                fetch = report.fetch.len(),
                "reconciled change batch"
            );
        }
        report
    }

    fn fold_into_store(&self, event: &ChangeEvent, report: &mut IngestReport) {
        let entity = event.entity();
        if event.update_type == UpdateType::Deleted {
            if self.store.remove(&entity).is_some() {
                report.removed.push(entity);
            }
            return;
        }

        if let Some(base) = self.store.get(&entity) {
            self.store.upsert(base.merged(&event.snapshot));
            report.upserted.push(entity);
            return;
        }

        let mut fields = event.snapshot.clone();
        fields
            .entry("id")
            .or_insert_with(|| serde_json::Value::String(event.entity_id.to_string()));
        match EntitySnapshot::from_fields(entity.kind, fields) {
            Ok(snapshot) => {
                self.store.upsert(snapshot);
                report.upserted.push(entity);
            }
            Err(err) => {
                trace!(%entity, %err, "partial payload; scheduling fetch");
                if !report.fetch.contains(&entity) {
                    report.fetch.push(entity);
                }
            }
        }
    }

    fn notification_for(&mut self, event: &ChangeEvent) -> Notification {
        let entity = event.entity();
        let name = ["name", "title", "reportDate"]
            .iter()
            .find_map(|key| event.snapshot.get(*key).and_then(serde_json::Value::as_str))
            .map(str::to_string)
            .or_else(|| {
                self.store
                    .get(&entity)
                    .and_then(|snap| snap.name().map(str::to_string))
            });
        let actor = event.metadata.updated_by.clone();
        let message = describe(event, name.as_deref(), actor.as_deref());
        self.next_id += 1;
        Notification {
            id: self.next_id,
            kind: event.update_type.into(),
            entity,
            entity_name: name,
            actor,
            timestamp: event.timestamp(),
            message,
            read: false,
        }
    }

    fn evict(&mut self) -> usize {
        let mut evicted = 0;
        while self.log.len() > self.cap {
            let Some(index) = self
                .log
                .iter()
                .position(|entry| !self.pinned.contains_key(&entry.notification.entity))
            else {
                debug!(len = self.log.len(), "notification log over cap; every entry pinned");
                break;
            };
            if let Some(entry) = self.log.remove(index) {
                self.window.remove(&entry.key);
                evicted += 1;
            }
        }
        evicted
    }

    /// Keep notifications about `entity` through eviction until
    /// [`end_action`](Self::end_action). Calls nest.
    pub fn begin_action(&mut self, entity: &EntityRef) {
        *self.pinned.entry(entity.clone()).or_insert(0) += 1;
    }

    pub fn end_action(&mut self, entity: &EntityRef) {
        if let Some(count) = self.pinned.get_mut(entity) {
            *count -= 1;
            if *count == 0 {
                self.pinned.remove(entity);
            }
        }
        self.evict();
    }

    /// Oldest first.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.log.iter().map(|entry| entry.notification.clone()).collect()
    }

    /// Notifications with an id greater than `after`, oldest first.
    #[must_use]
    pub fn since(&self, after: u64) -> Vec<Notification> {
        self.log
            .iter()
            .filter(|entry| entry.notification.id > after)
            .map(|entry| entry.notification.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.log.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.log.iter().filter(|entry| !entry.notification.read).count()
    }

    pub fn mark_read(&mut self, id: u64) -> bool {
        self.log
            .iter_mut()
            .find(|entry| entry.notification.id == id)
            .is_some_and(|entry| !std::mem::replace(&mut entry.notification.read, true))
    }

    /// Returns how many were unread.
    pub fn mark_all_read(&mut self) -> usize {
        self.log
            .iter_mut()
            .map(|entry| !std::mem::replace(&mut entry.notification.read, true))
            .filter(|was_unread| *was_unread)
            .count()
    }

    pub fn clear(&mut self) {
        self.log.clear();
        self.window.clear();
    }
}

fn describe(event: &ChangeEvent, name: Option<&str>, actor: Option<&str>) -> String {
    let label = event.entity_type.label();
    let subject = name.map_or_else(
        || format!("{label} {}", event.entity_id),
        |name| format!("{label} \"{name}\""),
    );
    let action = match event.update_type {
        UpdateType::Created => "was created".to_string(),
        UpdateType::Updated => "was updated".to_string(),
        UpdateType::Deleted => "was deleted".to_string(),
        UpdateType::StatusChanged => event.status().map_or_else(
            || "changed status".to_string(),
            |status| format!("moved to {}", status.replace('_', " ")),
        ),
    };
    match actor {
        Some(actor) => format!("{subject} {action} by {actor}"),
        None => format!("{subject} {action}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(id: &str, update: &str, ts: &str, snapshot: serde_json::Value) -> ChangeEvent {
        serde_json::from_value(json!({
            "entityId": id,
            "entityType": "project",
            "updateType": update,
            "snapshot": snapshot,
            "metadata": {"updatedBy": "dana", "timestamp": ts}
        }))
        .unwrap()
    }

    fn full(id: &str, status: &str) -> serde_json::Value {
        json!({"id": id, "name": format!("Site {id}"), "status": status})
    }

    #[test]
    fn duplicate_events_notify_once() {
        let store = EntityStore::new();
        let mut rec = NotificationReconciler::new(store, 50);
        let e = event("p1", "updated", "2026-05-01T10:00:00Z", full("p1", "planning"));

        let report = rec.ingest(&[e.clone(), e.clone(), e]);
        assert_eq!(report.appended.len(), 1);
        assert_eq!(report.duplicates, 2);
        assert_eq!(rec.len(), 1);
    }

    #[test]
    fn status_event_merges_onto_stored_snapshot() {
        let store = EntityStore::new();
        store.upsert(
            EntitySnapshot::from_value(
                crate::model::EntityKind::Project,
                json!({"id": "p1", "name": "Barn roof", "status": "planning", "capacityKw": 40}),
            )
            .unwrap(),
        );
        let mut rec = NotificationReconciler::new(store.clone(), 50);
        let report = rec.ingest(&[event(
            "p1",
            "status_changed",
            "2026-05-01T10:00:00Z",
            json!({"status": "in_progress"}),
        )]);

        assert_eq!(report.upserted, vec![EntityRef::project("p1")]);
        let snap = store.get(&EntityRef::project("p1")).unwrap();
        assert_eq!(snap.status(), Some("in_progress"));
        assert_eq!(snap.get("capacityKw"), Some(&json!(40)));
        let note = &rec.notifications()[0];
        assert_eq!(note.kind, NotificationType::EntityStatusChanged);
        assert_eq!(note.message, "Project \"Barn roof\" moved to in progress by dana");
    }

    #[test]
    fn thin_payload_for_unknown_entity_schedules_fetch() {
        let store = EntityStore::new();
        let mut rec = NotificationReconciler::new(store.clone(), 50);
        let report = rec.ingest(&[
            event("p9", "updated", "2026-05-01T10:00:00Z", json!({"status": "on_hold"})),
            event("p9", "updated", "2026-05-01T10:01:00Z", json!({"status": "planning"})),
        ]);
        assert_eq!(report.fetch, vec![EntityRef::project("p9")]);
        assert!(store.is_empty());
        assert_eq!(report.appended.len(), 2);
    }

    #[test]
    fn complete_payload_for_unknown_entity_is_stored() {
        let store = EntityStore::new();
        let mut rec = NotificationReconciler::new(store.clone(), 50);
        let report = rec.ingest(&[event("p2", "created", "2026-05-01T10:00:00Z", full("p2", "planning"))]);
        assert!(report.fetch.is_empty());
        assert!(store.contains(&EntityRef::project("p2")));
    }

    #[test]
    fn delete_event_removes_entity() {
        let store = EntityStore::new();
        let mut rec = NotificationReconciler::new(store.clone(), 50);
        rec.ingest(&[event("p3", "created", "2026-05-01T10:00:00Z", full("p3", "planning"))]);
        let report = rec.ingest(&[event("p3", "deleted", "2026-05-01T11:00:00Z", json!({}))]);
        assert_eq!(report.removed, vec![EntityRef::project("p3")]);
        assert!(!store.contains(&EntityRef::project("p3")));
        assert_eq!(
            rec.notifications()[1].message,
            "Project \"Site p3\" was deleted by dana"
        );
    }

    #[test]
    fn oldest_evicted_first_and_window_follows() {
        let mut rec = NotificationReconciler::new(EntityStore::new(), 2);
        let first = event("p1", "updated", "2026-05-01T10:00:00Z", full("p1", "planning"));
        rec.ingest(&[
            first.clone(),
            event("p2", "updated", "2026-05-01T10:01:00Z", full("p2", "planning")),
            event("p3", "updated", "2026-05-01T10:02:00Z", full("p3", "planning")),
        ]);
        let ids: Vec<_> = rec.notifications().iter().map(|n| n.entity.id.to_string()).collect();
        assert_eq!(ids, vec!["p2", "p3"]);

        let report = rec.ingest(&[first]);
        assert_eq!(report.duplicates, 0);
    }

    #[test]
    fn pinned_entity_survives_eviction() {
        let mut rec = NotificationReconciler::new(EntityStore::new(), 2);
        let pinned = EntityRef::project("p1");
        rec.begin_action(&pinned);
        rec.ingest(&[
            event("p1", "updated", "2026-05-01T10:00:00Z", full("p1", "planning")),
            event("p2", "updated", "2026-05-01T10:01:00Z", full("p2", "planning")),
            event("p3", "updated", "2026-05-01T10:02:00Z", full("p3", "planning")),
        ]);
        let ids: Vec<_> = rec.notifications().iter().map(|n| n.entity.id.to_string()).collect();
        assert_eq!(ids, vec!["p1", "p3"]);

        rec.end_action(&pinned);
        rec.ingest(&[event("p4", "updated", "2026-05-01T10:03:00Z", full("p4", "planning"))]);
        let ids: Vec<_> = rec.notifications().iter().map(|n| n.entity.id.to_string()).collect();
        assert_eq!(ids, vec!["p3", "p4"]);
    }

    #[test]
    fn read_state() {
        let mut rec = NotificationReconciler::new(EntityStore::new(), 10);
        let report = rec.ingest(&[
            event("p1", "created", "2026-05-01T10:00:00Z", full("p1", "planning")),
            event("p2", "created", "2026-05-01T10:00:00Z", full("p2", "planning")),
        ]);
        assert_eq!(rec.unread_count(), 2);
        assert!(rec.mark_read(report.appended[0]));
        assert!(!rec.mark_read(report.appended[0]));
        assert_eq!(rec.mark_all_read(), 1);
        assert_eq!(rec.mark_all_read(), 0);
        assert_eq!(rec.unread_count(), 0);
        assert_eq!(rec.since(report.appended[0]).len(), 1);
        rec.clear();
        assert!(rec.is_empty());
    }
}
