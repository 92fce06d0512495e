//! Status workflow engine.
//!
//! One engine per entity kind. The engine does not own status: it reads the
//! current status from the [`EntityStore`], validates the move against its
//! [`TransitionGraph`], and only writes the store after the server accepted
//! the change. Status changes are never applied optimistically.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::graph::{TransitionEdge, TransitionGraph};
use super::history::{StatusHistoryEntry, WorkflowSnapshot};
use crate::client::{ApiResponse, AuthProvider, RequestClient};
use crate::error::{SyncError, WorkflowError};
use crate::model::{ApprovalLevel, EntityId, EntityRef, EntitySnapshot, Lifecycle};
use crate::store::EntityStore;

/// Error code the server attaches when a transition needs sign-off.
const APPROVAL_REQUIRED: &str = "APPROVAL_REQUIRED";

/// A transition that passed local validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan<S> {
    pub entity: EntityRef,
    pub from: S,
    pub to: S,
    pub requires_approval: bool,
    pub approval_level: Option<ApprovalLevel>,
}

/// A transition the server committed.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome<S> {
    pub entity: EntityRef,
    pub from: S,
    pub to: S,
    pub snapshot: EntitySnapshot,
    pub history_entry: StatusHistoryEntry,
}

/// Parameters of one transition request beyond the target status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionRequest {
    pub reason: Option<String>,
    pub notify_stakeholders: bool,
}

impl TransitionRequest {
    #[must_use]
    pub fn new(reason: Option<String>, notify_stakeholders: bool) -> Self {
        Self {
            reason,
            notify_stakeholders,
        }
    }
}

pub struct WorkflowEngine<S: Lifecycle> {
    graph: TransitionGraph<S>,
    store: EntityStore,
    client: Arc<dyn RequestClient>,
    auth: Arc<dyn AuthProvider>,
    history: Mutex<HashMap<EntityId, Vec<StatusHistoryEntry>>>,
}

impl<S: Lifecycle> std::fmt::Debug for WorkflowEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("kind", &S::KIND)
            .field("graph", &self.graph)
            .finish_non_exhaustive()
    }
}

impl<S: Lifecycle> WorkflowEngine<S> {
    #[must_use]
    pub fn new(
        graph: TransitionGraph<S>,
        store: EntityStore,
        client: Arc<dyn RequestClient>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        Self {
            graph,
            store,
            client,
            auth,
            history: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn graph(&self) -> &TransitionGraph<S> {
        &self.graph
    }

    fn history_lock(&self) -> MutexGuard<'_, HashMap<EntityId, Vec<StatusHistoryEntry>>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parse a raw status. Unrecognized values have no edges.
    #[must_use]
    pub fn parse_status(raw: &str) -> Option<S> {
        raw.parse().ok()
    }

    /// Statuses reachable from `current`. Empty for terminal and for
    /// unrecognized statuses.
    #[must_use]
    pub fn allowed_transitions(&self, current: &str) -> Vec<S> {
        Self::parse_status(current).map_or_else(Vec::new, |from| self.graph.targets(from))
    }

    /// Validate a transition without touching the network.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::EntityNotFound`] when the store does not hold the
    /// entity, [`WorkflowError::InvalidTransition`] when the graph has no
    /// such edge (including every move out of a terminal or unrecognized
    /// status).
    pub fn plan_transition(&self, id: &EntityId, target: S) -> Result<TransitionPlan<S>, WorkflowError> {
        let entity = EntityRef::new(S::KIND, id.clone());
        let snapshot = self
            .store
            .get(&entity)
            .ok_or_else(|| WorkflowError::EntityNotFound {
                entity: entity.clone(),
            })?;
        let raw = snapshot.status().unwrap_or_default();

        let Some(from) = Self::parse_status(raw) else {
            warn!(%entity, status = raw, "unrecognized status; no transitions allowed");
            return Err(WorkflowError::InvalidTransition {
                entity,
                from: raw.to_string(),
                to: target.as_str().to_string(),
                allowed: Vec::new(),
            });
        };

        let Some(TransitionEdge {
            requires_approval,
            approval_level,
            ..
        }) = self.graph.edge(from, target).copied()
        else {
            debug!(%entity, from = from.as_str(), to = target.as_str(), "transition rejected locally");
            return Err(WorkflowError::InvalidTransition {
                entity,
                from: from.as_str().to_string(),
                to: target.as_str().to_string(),
                allowed: self
                    .graph
                    .targets(from)
                    .into_iter()
                    .map(|s| s.as_str().to_string())
                    .collect(),
            });
        };

        Ok(TransitionPlan {
            entity,
            from,
            to: target,
            requires_approval,
            approval_level,
        })
    }

    /// Validate, send `PATCH /<resource>/<id>/status`, and commit on success.
    ///
    /// # Errors
    ///
    /// Any [`WorkflowError`]. Local validation failures never reach the
    /// network; on every failure the stored status is left unchanged, except
    /// that a confirmed-but-different server status is stored as reported.
    pub async fn request_transition(
        &self,
        id: &EntityId,
        target: S,
        request: TransitionRequest,
    ) -> Result<TransitionOutcome<S>, WorkflowError> {
        let plan = self.plan_transition(id, target)?;
        if plan.requires_approval {
            debug!(entity = %plan.entity, level = ?plan.approval_level, "transition needs approval");
        }

        let body = json!({
            "status": target.as_str(),
            "reason": request.reason,
            "effectiveDate": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "notifyStakeholders": request.notify_stakeholders,
        });
        let path = format!("{}/status", plan.entity.path());
        let response = self.client.patch(&path, Some(body)).await;

        if !response.success {
            let err = Self::classify_failure(&plan, response);
            warn!(entity = %plan.entity, to = target.as_str(), error = %err, "transition failed");
            return Err(err);
        }

        self.commit_confirmed(plan, response.data, request.reason)
    }

    /// Commit a transition the server already accepted: store the status and
    /// append one history entry.
    ///
    /// `data` is the server's copy of the entity, when it sent one.
    pub(crate) fn commit_confirmed(
        &self,
        plan: TransitionPlan<S>,
        data: Option<Value>,
        reason: Option<String>,
    ) -> Result<TransitionOutcome<S>, WorkflowError> {
        let snapshot = self.commit(&plan, data)?;
        let entry = self.record_history(&plan, reason);
        info!(
            entity = %plan.entity,
            from = plan.from.as_str(),
            to = plan.to.as_str(),
            "status transition committed"
        );
        Ok(TransitionOutcome {
            entity: plan.entity,
            from: plan.from,
            to: plan.to,
            snapshot,
            history_entry: entry,
        })
    }

    fn classify_failure(plan: &TransitionPlan<S>, response: ApiResponse) -> WorkflowError {
        let needs_approval = response.has_error_code(APPROVAL_REQUIRED)
            || response
                .data
                .as_ref()
                .and_then(|data| data.get("requiresApproval"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
        if needs_approval {
            return WorkflowError::ApprovalRequired {
                level: plan.approval_level,
                message: response.message,
            };
        }

        let actual = response
            .data
            .as_ref()
            .and_then(|data| data.get("status"))
            .and_then(Value::as_str)
            .map(str::to_string);
        match SyncError::from_response(response, Some(&plan.entity)) {
            SyncError::Conflict { .. } => WorkflowError::ConflictingState {
                entity: plan.entity.clone(),
                expected: plan.from.as_str().to_string(),
                actual,
            },
            SyncError::Transport(err) => WorkflowError::NetworkFailure(err),
            SyncError::ServerRejection {
                status,
                message,
                errors,
                ..
            } => WorkflowError::Rejected {
                status,
                message,
                errors,
            },
            SyncError::Validation { message, .. } => WorkflowError::Rejected {
                status: None,
                message: Some(message),
                errors: Vec::new(),
            },
        }
    }

    /// Store the confirmed status. A full entity in the response replaces the
    /// stored snapshot; anything else only updates the status field.
    fn commit(&self, plan: &TransitionPlan<S>, data: Option<Value>) -> Result<EntitySnapshot, WorkflowError> {
        let server = data.and_then(|value| EntitySnapshot::from_value(S::KIND, value).ok());
        let Some(server) = server else {
            return self
                .store
                .set_status(&plan.entity, plan.to.as_str())
                .ok_or_else(|| WorkflowError::EntityNotFound {
                    entity: plan.entity.clone(),
                });
        };

        let reported = server.status().map(str::to_string);
        self.store.upsert(server.clone());
        match reported.as_deref().and_then(Self::parse_status) {
            Some(status) if status == plan.to => Ok(server),
            _ => {
                warn!(
                    entity = %plan.entity,
                    expected = plan.to.as_str(),
                    actual = reported.as_deref().unwrap_or("none"),
                    "server confirmed a different status"
                );
                Err(WorkflowError::ConflictingState {
                    entity: plan.entity.clone(),
                    expected: plan.to.as_str().to_string(),
                    actual: reported,
                })
            }
        }
    }

    fn record_history(&self, plan: &TransitionPlan<S>, reason: Option<String>) -> StatusHistoryEntry {
        let changed_by = self.auth.current_user().map(|user| user.id);
        let mut history = self.history_lock();
        let entries = history.entry(plan.entity.id.clone()).or_default();
        let entry = StatusHistoryEntry::new(plan.to.as_str(), Utc::now(), changed_by, reason, entries.last());
        entries.push(entry.clone());
        entry
    }

    /// Committed transitions for `id`, oldest first.
    #[must_use]
    pub fn history(&self, id: &EntityId) -> Vec<StatusHistoryEntry> {
        self.history_lock().get(id).cloned().unwrap_or_default()
    }

    /// Current workflow position of a stored entity.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::EntityNotFound`] when the store does not hold it.
    pub fn workflow(&self, id: &EntityId) -> Result<WorkflowSnapshot, WorkflowError> {
        let entity = EntityRef::new(S::KIND, id.clone());
        let snapshot = self
            .store
            .get(&entity)
            .ok_or(WorkflowError::EntityNotFound { entity })?;
        let raw = snapshot.status().unwrap_or_default().to_string();
        let parsed = Self::parse_status(&raw);
        let (requires_approval, approval_level) =
            parsed.map_or((false, None), |from| self.graph.approval_summary(from));

        Ok(WorkflowSnapshot {
            recognized: parsed.is_some(),
            allowed_transitions: self
                .allowed_transitions(&raw)
                .into_iter()
                .map(|s| s.as_str().to_string())
                .collect(),
            current_status: raw,
            requires_approval,
            approval_level,
            status_history: self.history(id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiErrorDetail, InMemoryClient, Method, StaticAuth};
    use crate::error::ErrorClass;
    use crate::model::{EntityKind, ProjectStatus, ReportStatus};

    fn setup(status: &str) -> (WorkflowEngine<ProjectStatus>, EntityStore, InMemoryClient) {
        let store = EntityStore::new();
        store.upsert(
            EntitySnapshot::from_value(
                EntityKind::Project,
                json!({"id": "p1", "name": "Depot canopy", "status": status}),
            )
            .unwrap(),
        );
        let client = InMemoryClient::new();
        let engine = WorkflowEngine::new(
            TransitionGraph::<ProjectStatus>::standard().unwrap(),
            store.clone(),
            Arc::new(client.clone()),
            Arc::new(StaticAuth::user("u7", "Robin")),
        );
        (engine, store, client)
    }

    fn status_of(store: &EntityStore) -> String {
        store
            .get(&EntityRef::project("p1"))
            .unwrap()
            .status()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn skipping_a_step_is_rejected_without_network() {
        let (engine, store, client) = setup("planning");
        let err = engine
            .request_transition(&"p1".into(), ProjectStatus::Completed, TransitionRequest::default())
            .await
            .unwrap_err();

        assert_eq!(err.class(), ErrorClass::Validation);
        let WorkflowError::InvalidTransition { allowed, .. } = err else {
            panic!("expected InvalidTransition");
        };
        assert_eq!(allowed, vec!["in_progress", "on_hold", "cancelled"]);
        assert_eq!(client.request_count(), 0);
        assert_eq!(status_of(&store), "planning");
    }

    #[tokio::test]
    async fn success_commits_status_and_history() {
        let (engine, store, client) = setup("planning");
        client.respond(
            Method::Patch,
            "/projects/p1/status",
            ApiResponse::ok(json!({"id": "p1", "name": "Depot canopy", "status": "in_progress"})),
        );

        let outcome = engine
            .request_transition(
                &"p1".into(),
                ProjectStatus::InProgress,
                TransitionRequest::new(Some("crew on site".into()), true),
            )
            .await
            .unwrap();

        assert_eq!(outcome.from, ProjectStatus::Planning);
        assert_eq!(status_of(&store), "in_progress");
        assert_eq!(engine.history(&"p1".into()).len(), 1);
        assert_eq!(outcome.history_entry.changed_by.as_deref(), Some("u7"));

        let body = client.requests()[0].body.clone().unwrap();
        assert_eq!(body["status"], "in_progress");
        assert_eq!(body["reason"], "crew on site");
        assert_eq!(body["notifyStakeholders"], true);
        assert!(body["effectiveDate"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn thin_success_response_updates_status_only() {
        let (engine, store, client) = setup("on_hold");
        client.respond(Method::Patch, "/projects/p1/status", ApiResponse::ok(json!({"ok": true})));
        engine
            .request_transition(&"p1".into(), ProjectStatus::InProgress, TransitionRequest::default())
            .await
            .unwrap();
        let snap = store.get(&EntityRef::project("p1")).unwrap();
        assert_eq!(snap.status(), Some("in_progress"));
        assert_eq!(snap.name(), Some("Depot canopy"));
    }

    #[tokio::test]
    async fn approval_required_leaves_status() {
        let (engine, store, client) = setup("in_progress");
        client.respond(
            Method::Patch,
            "/projects/p1/status",
            ApiResponse::failure(422, "Completion needs manager sign-off")
                .with_error(ApiErrorDetail::new("needs sign-off").with_code("APPROVAL_REQUIRED")),
        );
        let err = engine
            .request_transition(&"p1".into(), ProjectStatus::Completed, TransitionRequest::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::ApprovalRequired {
                level: Some(ApprovalLevel::Manager),
                message: Some("Completion needs manager sign-off".into()),
            }
        );
        assert_eq!(status_of(&store), "in_progress");
        assert!(engine.history(&"p1".into()).is_empty());
    }

    #[tokio::test]
    async fn network_failure_is_retryable_and_pessimistic() {
        let (engine, store, client) = setup("planning");
        client.respond(Method::Patch, "/projects/p1/status", ApiResponse::network_failure("timeout"));
        let err = engine
            .request_transition(&"p1".into(), ProjectStatus::OnHold, TransitionRequest::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(status_of(&store), "planning");
    }

    #[tokio::test]
    async fn conflict_status_maps_to_conflicting_state() {
        let (engine, _store, client) = setup("planning");
        let mut resp = ApiResponse::failure(409, "stale");
        resp.data = Some(json!({"status": "cancelled"}));
        client.respond(Method::Patch, "/projects/p1/status", resp);
        let err = engine
            .request_transition(&"p1".into(), ProjectStatus::InProgress, TransitionRequest::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::ConflictingState {
                entity: EntityRef::project("p1"),
                expected: "planning".into(),
                actual: Some("cancelled".into()),
            }
        );
    }

    #[tokio::test]
    async fn server_reporting_other_status_is_a_conflict() {
        let (engine, store, client) = setup("planning");
        client.respond(
            Method::Patch,
            "/projects/p1/status",
            ApiResponse::ok(json!({"id": "p1", "name": "Depot canopy", "status": "on_hold"})),
        );
        let err = engine
            .request_transition(&"p1".into(), ProjectStatus::InProgress, TransitionRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ConflictingState { .. }));
        assert_eq!(status_of(&store), "on_hold");
        assert!(engine.history(&"p1".into()).is_empty());
    }

    #[tokio::test]
    async fn legacy_status_fails_closed() {
        let (engine, _store, client) = setup("awaiting_permit");
        let snapshot = engine.workflow(&"p1".into()).unwrap();
        assert!(!snapshot.recognized);
        assert!(snapshot.allowed_transitions.is_empty());

        let err = engine
            .request_transition(&"p1".into(), ProjectStatus::InProgress, TransitionRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
        assert_eq!(client.request_count(), 0);
    }

    #[tokio::test]
    async fn unknown_entity_is_not_found() {
        let store = EntityStore::new();
        let engine = WorkflowEngine::new(
            TransitionGraph::<ReportStatus>::standard().unwrap(),
            store,
            Arc::new(InMemoryClient::new()),
            Arc::new(StaticAuth::default()),
        );
        let err = engine
            .request_transition(&"r1".into(), ReportStatus::Submitted, TransitionRequest::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::EntityNotFound {
                entity: EntityRef::daily_report("r1")
            }
        );
    }

    #[test]
    fn workflow_snapshot_summarizes_outgoing_edges() {
        let (engine, _store, _client) = setup("in_progress");
        let snapshot = engine.workflow(&"p1".into()).unwrap();
        assert_eq!(snapshot.current_status, "in_progress");
        assert_eq!(
            snapshot.allowed_transitions,
            vec!["on_hold", "completed", "cancelled"]
        );
        assert!(snapshot.requires_approval);
        assert_eq!(snapshot.approval_level, Some(ApprovalLevel::Admin));
    }
}
