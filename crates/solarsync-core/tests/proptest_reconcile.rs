use std::collections::HashSet;

use proptest::prelude::*;
use serde_json::json;
use solarsync_core::store::EntityStore;
use solarsync_core::sync::{ChangeEvent, NotificationReconciler};


const UPDATES: [&str; 4] = ["created", "updated", "status_changed", "deleted"];

fn arb_event() -> impl Strategy<Value = ChangeEvent> {
    (0u8..6, 0u32..20, 0usize..UPDATES.len()).prop_map(|(id, minute, update)| {
        fixtures::event(
            "project",
            &format!("p{id}"),
            UPDATES[update],
            &format!("2026-05-04T10:{minute:02}:00Z"),
            json!({"name": format!("Site {id}"), "status": "planning"}),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn log_never_exceeds_cap(
        cap in 1usize..16,
        batches in prop::collection::vec(prop::collection::vec(arb_event(), 0..24), 1..6),
    ) {
        let mut reconciler = NotificationReconciler::new(EntityStore::new(), cap);
        for batch in &batches {
            reconciler.ingest(batch);
            prop_assert!(reconciler.len() <= cap);
        }
    }

    #[test]
    fn retained_notifications_are_unique(events in prop::collection::vec(arb_event(), 0..80)) {
        let mut reconciler = NotificationReconciler::new(EntityStore::new(), 50);
        reconciler.ingest(&events);

        let mut seen = HashSet::new();
        for note in reconciler.notifications() {
            prop_assert!(seen.insert((note.entity.clone(), note.timestamp, note.kind)));
        }
    }

    #[test]
    fn ids_increase_in_insertion_order(events in prop::collection::vec(arb_event(), 0..80)) {
        let mut reconciler = NotificationReconciler::new(EntityStore::new(), 50);
        reconciler.ingest(&events);
        let ids: Vec<u64> = reconciler.notifications().iter().map(|n| n.id).collect();
        prop_assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn reingesting_a_batch_appends_nothing(events in prop::collection::vec(arb_event(), 0..40)) {
        let mut reconciler = NotificationReconciler::new(EntityStore::new(), 50);
        reconciler.ingest(&events);
        let again = reconciler.ingest(&events);
        prop_assert!(again.appended.is_empty());
    }
}
