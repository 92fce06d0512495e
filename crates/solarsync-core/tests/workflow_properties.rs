use serde_json::json;
use solarsync_core::client::{ApiResponse, InMemoryClient, Method};
use solarsync_core::error::{ErrorClass, SyncError};
use solarsync_core::model::{EntityId, EntityRef, Lifecycle, ProjectStatus, ReportStatus};
use solarsync_core::workflow::{TransitionGraph, TransitionRequest};

use fixtures::*;

#[tokio::test]
async fn terminal_statuses_reject_every_target_without_network() {
    let client = InMemoryClient::new();
    let sync = synchronizer(&client);

    let project_graph = TransitionGraph::<ProjectStatus>::standard().unwrap();
    for &terminal in ProjectStatus::ALL.iter().filter(|s| project_graph.is_terminal(**s)) {
        let id = format!("p-{}", terminal.as_str());
        sync.store().upsert(project(&id, terminal.as_str()));
        for &target in ProjectStatus::ALL {
            let err = sync
                .projects()
                .request_transition(&EntityId::new(&id), target, TransitionRequest::default())
                .await
                .unwrap_err();
            assert_eq!(SyncError::from(err).class(), ErrorClass::Validation);
        }
    }

    let report_graph = TransitionGraph::<ReportStatus>::standard().unwrap();
    for &terminal in ReportStatus::ALL.iter().filter(|s| report_graph.is_terminal(**s)) {
        let id = format!("r-{}", terminal.as_str());
        sync.store().upsert(report(&id, terminal.as_str()));
        for &target in ReportStatus::ALL {
            let err = sync
                .daily_reports()
                .request_transition(&EntityId::new(&id), target, TransitionRequest::default())
                .await
                .unwrap_err();
            assert_eq!(SyncError::from(err).class(), ErrorClass::Validation);
        }
    }

    assert_eq!(client.request_count(), 0);
}

#[tokio::test]
async fn every_valid_transition_commits_once() {
    let graph = TransitionGraph::<ProjectStatus>::standard().unwrap();
    for &from in ProjectStatus::ALL {
        for edge in graph.allowed(from) {
            let client = InMemoryClient::new();
            let sync = synchronizer(&client);
            sync.store().upsert(project("p1", from.as_str()));
            client.respond(
                Method::Patch,
                "/projects/p1/status",
                ApiResponse::ok(json!({"id": "p1", "name": "Installation p1", "status": edge.to.as_str()})),
            );

            let id = EntityId::new("p1");
            sync.projects()
                .request_transition(&id, edge.to, TransitionRequest::new(Some("scheduled".into()), false))
                .await
                .unwrap_or_else(|err| panic!("{from} -> {}: {err}", edge.to));

            let history = sync.projects().history(&id);
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].status, edge.to.as_str());
            assert_eq!(
                sync.store().get(&EntityRef::project("p1")).unwrap().status(),
                Some(edge.to.as_str())
            );
        }
    }
}

#[tokio::test]
async fn planning_cannot_jump_to_completed() {
    let client = InMemoryClient::new();
    let sync = synchronizer(&client);
    sync.store().upsert(project("p1", "planning"));

    let result = sync
        .projects()
        .request_transition(&EntityId::new("p1"), ProjectStatus::Completed, TransitionRequest::default())
        .await;

    assert!(result.is_err());
    assert_eq!(
        sync.store().get(&EntityRef::project("p1")).unwrap().status(),
        Some("planning")
    );
    assert_eq!(client.request_count(), 0);
}

#[tokio::test]
async fn report_review_cycle_records_history_in_order() {
    let client = InMemoryClient::new();
    let sync = synchronizer(&client);
    sync.store().upsert(report("r1", "draft"));
    client.respond_with(Method::Patch, "/daily-reports/r1/status", |req| {
        let status = req.body.as_ref().and_then(|b| b["status"].as_str()).unwrap_or("draft");
        ApiResponse::ok(json!({"id": "r1", "projectId": "p1", "reportDate": "2026-05-04", "status": status}))
    });

    let id = EntityId::new("r1");
    for target in [ReportStatus::Submitted, ReportStatus::Rejected, ReportStatus::Draft, ReportStatus::Submitted] {
        sync.daily_reports()
            .request_transition(&id, target, TransitionRequest::default())
            .await
            .unwrap();
    }

    let statuses: Vec<_> = sync
        .daily_reports()
        .history(&id)
        .into_iter()
        .map(|entry| entry.status)
        .collect();
    assert_eq!(statuses, vec!["submitted", "rejected", "draft", "submitted"]);

    let workflow = sync.daily_reports().workflow(&id).unwrap();
    assert_eq!(workflow.current_status, "submitted");
    assert_eq!(workflow.allowed_transitions, vec!["approved", "rejected", "draft"]);
    assert_eq!(workflow.status_history.len(), 4);
    assert_eq!(workflow.status_history[0].changed_by.as_deref(), Some("u-ops"));
}
