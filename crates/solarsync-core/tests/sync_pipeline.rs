use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use solarsync_core::bulk::{BulkOperation, BulkSummary};
use solarsync_core::client::{ApiResponse, InMemoryClient, Method};
use solarsync_core::model::{EntityId, EntityKind, EntityRef};
use solarsync_core::store::EntityStore;
use solarsync_core::sync::{NotificationReconciler, PollScope};

use fixtures::*;

#[test]
fn duplicate_events_yield_one_notification() {
    let mut reconciler = NotificationReconciler::new(EntityStore::new(), 50);
    let dup = event("project", "p1", "updated", "2026-05-04T08:00:00Z", json!({"name": "Roof A"}));
    let batch = vec![dup; 7];

    let report = reconciler.ingest(&batch);
    assert_eq!(report.appended.len(), 1);
    assert_eq!(reconciler.len(), 1);
}

#[test]
fn cap_keeps_fifty_most_recent() {
    let mut reconciler = NotificationReconciler::new(EntityStore::new(), 50);
    let events: Vec<_> = (0..60)
        .map(|i| {
            event(
                "project",
                &format!("p{i}"),
                "created",
                &format!("2026-05-04T08:{:02}:00Z", i % 60),
                json!({"name": format!("Site {i}"), "status": "planning"}),
            )
        })
        .collect();

    reconciler.ingest(&events);
    let kept = reconciler.notifications();
    assert_eq!(kept.len(), 50);
    assert_eq!(kept[0].entity, EntityRef::project("p10"));
    assert_eq!(kept[49].entity, EntityRef::project("p59"));
}

#[tokio::test]
async fn bulk_reports_partial_failure() {
    let client = InMemoryClient::new();
    let sync = synchronizer(&client);
    for id in ["A", "B", "C"] {
        sync.store().upsert(project(id, "planning"));
    }
    client.respond(Method::Delete, "/projects/A", ApiResponse::ok(Value::Null));
    client.respond(Method::Delete, "/projects/B", ApiResponse::failure(422, "Project has open invoices"));
    client.respond(Method::Delete, "/projects/C", ApiResponse::ok(Value::Null));

    let ids: Vec<EntityId> = ["A", "B", "C"].into_iter().map(EntityId::from).collect();
    let result = sync.project_bulk().apply(&BulkOperation::Delete, &ids).await;

    assert_eq!(result.summary, BulkSummary { total: 3, successful: 2, failed: 1 });
    assert_eq!(result.failed[0].entity_id.as_str(), "B");
    assert_eq!(result.failed[0].error.user_message(), "Project has open invoices");
}

#[tokio::test]
async fn cursor_carries_forward_across_empty_poll() {
    let client = InMemoryClient::new();
    client.respond(
        Method::Get,
        "/projects/updates",
        ApiResponse::ok(json!([
            event_json("project", "p1", "updated", "2026-05-04T08:05:00Z", json!({"status": "on_hold"})),
            event_json("project", "p2", "updated", "2026-05-04T08:07:30Z", json!({"status": "planning"})),
        ])),
    );
    client.respond(Method::Get, "/projects/updates", ApiResponse::ok(json!([])));
    client.respond(Method::Get, "/projects/updates", ApiResponse::ok(json!([])));

    let sync = synchronizer(&client);
    sync.store().upsert(project("p1", "planning"));
    sync.store().upsert(project("p2", "on_hold"));

    let t0 = Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap();
    let handle = sync.register(PollScope::Kind(EntityKind::Project), Some(t0));

    sync.sync_once(handle).await.unwrap();
    sync.sync_once(handle).await.unwrap();
    sync.sync_once(handle).await.unwrap();

    let paths: Vec<String> = client.requests().into_iter().map(|r| r.path).collect();
    assert_eq!(
        paths,
        vec![
            "/projects/updates?since=2026-05-04T08:00:00.000Z",
            "/projects/updates?since=2026-05-04T08:07:30.000Z",
            "/projects/updates?since=2026-05-04T08:07:30.000Z",
        ]
    );
    assert_eq!(
        sync.store().get(&EntityRef::project("p1")).unwrap().status(),
        Some("on_hold")
    );
}

#[tokio::test]
async fn late_result_after_unsubscribe_is_discarded() {
    let client = InMemoryClient::new().with_latency(std::time::Duration::from_millis(20));
    client.respond(
        Method::Get,
        "/projects/p1/updates",
        ApiResponse::ok(json!([event_json(
            "project",
            "p1",
            "updated",
            "2026-05-04T09:00:00Z",
            json!({"status": "on_hold"})
        )])),
    );
    let sync = synchronizer(&client);
    sync.store().upsert(project("p1", "planning"));
    let handle = sync.register(PollScope::entity(EntityKind::Project, "p1"), None);

    let poll = sync.sync_once(handle);
    let cancel = async {
        tokio::task::yield_now().await;
        sync.unsubscribe(handle)
    };
    let (report, cancelled) = tokio::join!(poll, cancel);

    assert!(cancelled);
    assert!(report.unwrap().appended.is_empty());
    assert!(sync.notifications().is_empty());
    assert_eq!(
        sync.store().get(&EntityRef::project("p1")).unwrap().status(),
        Some("planning")
    );
}

#[test]
fn optimistic_then_rollback_restores_every_field() {
    let original = project("p1", "in_progress");
    let store = store_with([original.clone()]);
    let entity = EntityRef::project("p1");
    let patch = json!({"managerId": "m-42", "capacityKw": 11.2, "status": "on_hold"});

    let token = store
        .apply_optimistic(&entity, patch.as_object().unwrap())
        .unwrap();
    assert_ne!(store.get(&entity).unwrap(), original);
    assert!(store.rollback(token));
    assert_eq!(store.get(&entity).unwrap(), original);
}
