//! Bulk operations across many entities of one kind.
//!
//! Each id is handled independently: one failure never cancels the others,
//! and the result always accounts for every input id. Status changes go
//! through the [`WorkflowEngine`] and are pessimistic; manager and team
//! changes are applied to the store optimistically and rolled back when the
//! server refuses them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::client::{ApiRequest, Method, RequestClient};
use crate::config::SyncConfig;
use crate::error::{ErrorCode, SyncError};
use crate::model::{EntityId, EntityRef, EntitySnapshot, Lifecycle};
use crate::store::EntityStore;
use crate::workflow::{TransitionPlan, TransitionRequest, WorkflowEngine};

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// A single-entity operation to repeat across ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOperation<S> {
    UpdateStatus {
        status: S,
        reason: Option<String>,
        notify_stakeholders: bool,
    },
    AssignManager {
        manager_id: String,
    },
    UpdateTeam {
        member_ids: Vec<String>,
    },
    Delete,
}

impl<S: Lifecycle> BulkOperation<S> {
    /// Wire name used by the bulk endpoint.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::UpdateStatus { .. } => "update_status",
            Self::AssignManager { .. } => "assign_manager",
            Self::UpdateTeam { .. } => "update_team",
            Self::Delete => "delete",
        }
    }

    /// `data` member of the bulk endpoint body.
    #[must_use]
    pub fn data(&self) -> Value {
        match self {
            Self::UpdateStatus {
                status,
                reason,
                notify_stakeholders,
            } => json!({
                "status": status.as_str(),
                "reason": reason,
                "notifyStakeholders": notify_stakeholders,
            }),
            Self::AssignManager { manager_id } => json!({ "managerId": manager_id }),
            Self::UpdateTeam { member_ids } => json!({ "memberIds": member_ids }),
            Self::Delete => json!({}),
        }
    }

    /// Fields changed on the stored snapshot when the operation succeeds.
    fn store_patch(&self) -> Option<Map<String, Value>> {
        let patch = match self {
            Self::UpdateStatus { status, .. } => json!({ "status": status.as_str() }),
            Self::AssignManager { manager_id } => json!({ "managerId": manager_id }),
            Self::UpdateTeam { member_ids } => json!({ "teamMemberIds": member_ids }),
            Self::Delete => return None,
        };
        patch.as_object().cloned()
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFailure {
    pub entity_id: EntityId,
    pub error: SyncError,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Per-id outcome of a bulk run. Lists are in completion order, not input
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkOperationResult {
    pub successful: Vec<EntityId>,
    pub failed: Vec<BulkFailure>,
    pub summary: BulkSummary,
}

impl BulkOperationResult {
    fn from_outcomes(outcomes: Vec<(EntityId, Result<(), SyncError>)>) -> Self {
        let mut result = Self {
            summary: BulkSummary {
                total: outcomes.len(),
                ..BulkSummary::default()
            },
            ..Self::default()
        };
        for (entity_id, outcome) in outcomes {
            match outcome {
                Ok(()) => result.successful.push(entity_id),
                Err(error) => result.failed.push(BulkFailure { entity_id, error }),
            }
        }
        result.summary.successful = result.successful.len();
        result.summary.failed = result.failed.len();
        result
    }

    /// Ids to retry.
    #[must_use]
    pub fn failed_ids(&self) -> Vec<EntityId> {
        self.failed.iter().map(|f| f.entity_id.clone()).collect()
    }

    #[must_use]
    pub const fn is_complete_success(&self) -> bool {
        self.summary.failed == 0
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFailure {
    entity_id: EntityId,
    #[serde(default)]
    error: Value,
}

#[derive(Debug, Deserialize)]
struct RemoteResult {
    #[serde(default)]
    successful: Vec<EntityId>,
    #[serde(default)]
    failed: Vec<RemoteFailure>,
}

fn remote_error(error: &Value) -> SyncError {
    let message = match error {
        Value::String(text) => Some(text.clone()),
        Value::Object(obj) => obj.get("message").and_then(Value::as_str).map(str::to_string),
        _ => None,
    };
    SyncError::ServerRejection {
        code: ErrorCode::ServerRejected,
        status: None,
        message,
        errors: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct BulkCoordinator<S: Lifecycle> {
    engine: Arc<WorkflowEngine<S>>,
    store: EntityStore,
    client: Arc<dyn RequestClient>,
    max_concurrency: usize,
    use_bulk_endpoint: bool,
}

impl<S: Lifecycle> std::fmt::Debug for BulkCoordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkCoordinator")
            .field("kind", &S::KIND)
            .field("max_concurrency", &self.max_concurrency)
            .field("use_bulk_endpoint", &self.use_bulk_endpoint)
            .finish_non_exhaustive()
    }
}

impl<S: Lifecycle> BulkCoordinator<S> {
    #[must_use]
    pub fn new(
        engine: Arc<WorkflowEngine<S>>,
        store: EntityStore,
        client: Arc<dyn RequestClient>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            engine,
            store,
            client,
            max_concurrency: config.bulk.max_concurrency.max(1),
            use_bulk_endpoint: config.api.use_bulk_endpoint,
        }
    }

    /// Run `operation` for every id.
    ///
    /// Uses the bulk endpoint when configured, otherwise one request per id
    /// with at most `bulk.max_concurrency` in flight.
    pub async fn apply(&self, operation: &BulkOperation<S>, ids: &[EntityId]) -> BulkOperationResult {
        let result = if self.use_bulk_endpoint {
            self.apply_remote(operation, ids).await
        } else {
            self.apply_each(operation, ids).await
        };
        info!(
            kind = %S::KIND,
            operation = operation.name(),
            total = result.summary.total,
            failed = result.summary.failed,
            "bulk operation finished"
        );
        result
    }

    /// One request per id, concurrently.
    pub async fn apply_each(&self, operation: &BulkOperation<S>, ids: &[EntityId]) -> BulkOperationResult {
        let outcomes: Vec<(EntityId, Result<(), SyncError>)> = stream::iter(ids.iter().cloned())
            .map(|id| async move {
                let outcome = self.apply_one(operation, &id).await;
                (id, outcome)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;
        BulkOperationResult::from_outcomes(outcomes)
    }

    async fn apply_one(&self, operation: &BulkOperation<S>, id: &EntityId) -> Result<(), SyncError> {
        let entity = EntityRef::new(S::KIND, id.clone());
        match operation {
            BulkOperation::UpdateStatus {
                status,
                reason,
                notify_stakeholders,
            } => self
                .engine
                .request_transition(id, *status, TransitionRequest::new(reason.clone(), *notify_stakeholders))
                .await
                .map(|_| ())
                .map_err(SyncError::from),
            BulkOperation::AssignManager { .. } => {
                let request = ApiRequest::new(Method::Patch, entity.path(), Some(operation.data()));
                self.send_optimistic(&entity, operation, request).await
            }
            BulkOperation::UpdateTeam { .. } => {
                let request = ApiRequest::new(
                    Method::Put,
                    format!("{}/team", entity.path()),
                    Some(operation.data()),
                );
                self.send_optimistic(&entity, operation, request).await
            }
            BulkOperation::Delete => {
                let response = self.client.delete(&entity.path(), None).await;
                if !response.success {
                    return Err(SyncError::from_response(response, Some(&entity)));
                }
                self.store.remove(&entity);
                Ok(())
            }
        }
    }

    async fn send_optimistic(
        &self,
        entity: &EntityRef,
        operation: &BulkOperation<S>,
        request: ApiRequest,
    ) -> Result<(), SyncError> {
        let token = operation
            .store_patch()
            .and_then(|patch| self.store.apply_optimistic(entity, &patch).ok());

        let response = self.client.send(request).await;
        if !response.success {
            if let Some(token) = token {
                self.store.rollback(token);
            }
            debug!(%entity, status = response.status, "optimistic change rolled back");
            return Err(SyncError::from_response(response, Some(entity)));
        }

        if let Some(token) = token {
            self.store.confirm(token);
        }
        if let Some(snapshot) = response
            .data
            .and_then(|data| EntitySnapshot::from_value(S::KIND, data).ok())
        {
            self.store.upsert(snapshot);
        }
        Ok(())
    }

    /// A single `POST /<resource>/bulk` call.
    ///
    /// Status changes are still validated locally first; ids that fail the
    /// pre-flight are not sent. If the request itself fails every sent id
    /// fails with that error. Ids the server leaves out of its answer count
    /// as failed.
    pub async fn apply_remote(&self, operation: &BulkOperation<S>, ids: &[EntityId]) -> BulkOperationResult {
        let mut outcomes = Vec::with_capacity(ids.len());
        let mut send = Vec::with_capacity(ids.len());
        let mut plans = HashMap::new();
        for id in ids {
            if let BulkOperation::UpdateStatus { status, .. } = operation {
                match self.engine.plan_transition(id, *status) {
                    Ok(plan) => {
                        plans.insert(id.clone(), plan);
                    }
                    Err(err) => {
                        outcomes.push((id.clone(), Err(SyncError::from(err))));
                        continue;
                    }
                }
            }
            send.push(id.clone());
        }
        if !send.is_empty() {
            outcomes.extend(self.send_bulk(operation, &send, &plans).await);
        }
        BulkOperationResult::from_outcomes(outcomes)
    }

    async fn send_bulk(
        &self,
        operation: &BulkOperation<S>,
        ids: &[EntityId],
        plans: &HashMap<EntityId, TransitionPlan<S>>,
    ) -> Vec<(EntityId, Result<(), SyncError>)> {
        let fail_all = |error: SyncError| -> Vec<(EntityId, Result<(), SyncError>)> {
            ids.iter().map(|id| (id.clone(), Err(error.clone()))).collect()
        };

        let path = format!("/{}/bulk", S::KIND.resource());
        let body = json!({
            "operation": operation.name(),
            "entityIds": ids,
            "data": operation.data(),
        });
        let response = self.client.post(&path, Some(body)).await;
        if !response.success {
            return fail_all(SyncError::from_response(response, None));
        }

        let parsed = response
            .data
            .map(serde_json::from_value::<RemoteResult>)
            .transpose();
        let Ok(Some(remote)) = parsed else {
            return fail_all(SyncError::malformed("bulk response has no result"));
        };

        let succeeded: HashSet<&EntityId> = remote.successful.iter().collect();
        ids.iter()
            .map(|id| {
                if succeeded.contains(id) {
                    return (id.clone(), self.apply_locally(operation, id, plans.get(id)));
                }
                let error = remote
                    .failed
                    .iter()
                    .find(|failure| failure.entity_id == *id)
                    .map_or_else(
                        || SyncError::malformed(format!("{id} missing from bulk response")),
                        |failure| remote_error(&failure.error),
                    );
                (id.clone(), Err(error))
            })
            .collect()
    }

    /// Mirror a change the bulk endpoint accepted. Status changes take the
    /// engine's commit path so history is recorded.
    fn apply_locally(
        &self,
        operation: &BulkOperation<S>,
        id: &EntityId,
        plan: Option<&TransitionPlan<S>>,
    ) -> Result<(), SyncError> {
        let entity = EntityRef::new(S::KIND, id.clone());
        if let (BulkOperation::UpdateStatus { reason, .. }, Some(plan)) = (operation, plan) {
            return self
                .engine
                .commit_confirmed(plan.clone(), None, reason.clone())
                .map(|_| ())
                .map_err(SyncError::from);
        }
        match operation.store_patch() {
            None => {
                self.store.remove(&entity);
            }
            Some(patch) => {
                if let Some(current) = self.store.get(&entity) {
                    self.store.upsert(current.merged(&patch));
                }
            }
        }
        Ok(())
    }
}
