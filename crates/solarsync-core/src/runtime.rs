//! Application-level wiring.
//!
//! [`SyncContext`] carries the collaborators every component needs. A
//! [`Synchronizer`] built from it owns the store, poller, reconciler, engines
//! and bulk coordinators, and runs the pump task that feeds polled batches
//! through the reconciler. Call [`Synchronizer::dispose`] on shutdown; it is
//! also called on drop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bulk::BulkCoordinator;
use crate::client::{AuthProvider, RequestClient, UserIdentity};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::model::{EntityRef, EntitySnapshot, ProjectStatus, ReportStatus};
use crate::store::EntityStore;
use crate::sync::{
    ChangeBatch, ChangePoller, IngestReport, Notification, NotificationReconciler, PollOutcome,
    PollScope, SubscriptionHandle,
};
use crate::workflow::{GraphError, TransitionGraph, WorkflowEngine};

/// Collaborators passed to every component at construction.
#[derive(Clone)]
pub struct SyncContext {
    pub client: Arc<dyn RequestClient>,
    pub auth: Arc<dyn AuthProvider>,
    pub config: SyncConfig,
}

impl SyncContext {
    #[must_use]
    pub fn new(client: Arc<dyn RequestClient>, auth: Arc<dyn AuthProvider>, config: SyncConfig) -> Self {
        Self {
            client,
            auth,
            config,
        }
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Fetch one entity and store it.
///
/// # Errors
///
/// The request's [`SyncError`], or a malformed-response error when the
/// payload is not a full snapshot.
pub async fn fetch_entity(
    client: &dyn RequestClient,
    store: &EntityStore,
    entity: &EntityRef,
) -> Result<EntitySnapshot, SyncError> {
    let response = client.get(&entity.path()).await;
    if !response.success {
        return Err(SyncError::from_response(response, Some(entity)));
    }
    let data = response
        .data
        .ok_or_else(|| SyncError::malformed(format!("{entity}: empty response")))?;
    let snapshot = EntitySnapshot::from_value(entity.kind, data)
        .map_err(|err| SyncError::malformed(format!("{entity}: {err}")))?;
    if snapshot.id() != &entity.id {
        return Err(SyncError::malformed(format!(
            "{entity}: response carries id {}",
            snapshot.id()
        )));
    }
    store.upsert(snapshot.clone());
    Ok(snapshot)
}

#[derive(Clone)]
struct Pipeline {
    store: EntityStore,
    reconciler: Arc<Mutex<NotificationReconciler>>,
    client: Arc<dyn RequestClient>,
}

impl Pipeline {
    fn reconciler(&self) -> MutexGuard<'_, NotificationReconciler> {
        self.reconciler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn process(&self, batch: &ChangeBatch) -> IngestReport {
        let report = self.reconciler().ingest(&batch.events);
        for entity in &report.fetch {
            if let Err(err) = fetch_entity(self.client.as_ref(), &self.store, entity).await {
                warn!(%entity, error = %err, "point fetch failed");
            }
        }
        report
    }
}

async fn run_pump(pipeline: Pipeline, mut batches: mpsc::UnboundedReceiver<ChangeBatch>) {
    while let Some(batch) = batches.recv().await {
        let report = pipeline.process(&batch).await;
        debug!(
            handle = %batch.handle,
            appended = report.appended.len(),
            fetched = report.fetch.len(),
            "batch processed"
        );
    }
}

pub struct Synchronizer {
    ctx: SyncContext,
    store: EntityStore,
    poller: ChangePoller,
    pipeline: Pipeline,
    projects: Arc<WorkflowEngine<ProjectStatus>>,
    daily_reports: Arc<WorkflowEngine<ReportStatus>>,
    project_bulk: BulkCoordinator<ProjectStatus>,
    report_bulk: BulkCoordinator<ReportStatus>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("store", &self.store)
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

impl Synchronizer {
    /// Build every component and start the pump task.
    ///
    /// Outside a tokio runtime no pump runs; drive polling with
    /// [`sync_once`](Self::sync_once).
    ///
    /// # Errors
    ///
    /// [`GraphError`] when a status graph fails validation.
    pub fn init(ctx: SyncContext) -> Result<Self, GraphError> {
        let store = EntityStore::new();
        let projects = Arc::new(WorkflowEngine::new(
            TransitionGraph::<ProjectStatus>::standard()?,
            store.clone(),
            Arc::clone(&ctx.client),
            Arc::clone(&ctx.auth),
        ));
        let daily_reports = Arc::new(WorkflowEngine::new(
            TransitionGraph::<ReportStatus>::standard()?,
            store.clone(),
            Arc::clone(&ctx.client),
            Arc::clone(&ctx.auth),
        ));
        let project_bulk = BulkCoordinator::new(
            Arc::clone(&projects),
            store.clone(),
            Arc::clone(&ctx.client),
            &ctx.config,
        );
        let report_bulk = BulkCoordinator::new(
            Arc::clone(&daily_reports),
            store.clone(),
            Arc::clone(&ctx.client),
            &ctx.config,
        );

        let (poller, batches) = ChangePoller::new(Arc::clone(&ctx.client), ctx.config.poll.clone());
        let pipeline = Pipeline {
            store: store.clone(),
            reconciler: Arc::new(Mutex::new(NotificationReconciler::new(
                store.clone(),
                ctx.config.notifications.cap,
            ))),
            client: Arc::clone(&ctx.client),
        };

        let pump = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Some(runtime.spawn(run_pump(pipeline.clone(), batches))),
            Err(_) => {
                warn!("no async runtime; background polling disabled");
                None
            }
        };
        info!(api = %ctx.config.api.base_url, "synchronizer started");

        Ok(Self {
            ctx,
            store,
            poller,
            pipeline,
            projects,
            daily_reports,
            project_bulk,
            report_bulk,
            pump: Mutex::new(pump),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.ctx.config
    }

    #[must_use]
    pub const fn store(&self) -> &EntityStore {
        &self.store
    }

    #[must_use]
    pub const fn poller(&self) -> &ChangePoller {
        &self.poller
    }

    #[must_use]
    pub fn projects(&self) -> &WorkflowEngine<ProjectStatus> {
        &self.projects
    }

    #[must_use]
    pub fn daily_reports(&self) -> &WorkflowEngine<ReportStatus> {
        &self.daily_reports
    }

    #[must_use]
    pub const fn project_bulk(&self) -> &BulkCoordinator<ProjectStatus> {
        &self.project_bulk
    }

    #[must_use]
    pub const fn report_bulk(&self) -> &BulkCoordinator<ReportStatus> {
        &self.report_bulk
    }

    #[must_use]
    pub fn current_user(&self) -> Option<UserIdentity> {
        self.ctx.auth.current_user()
    }

    /// Start a timed subscription whose batches flow through the pump.
    pub fn subscribe(&self, scope: PollScope, since: Option<DateTime<Utc>>) -> SubscriptionHandle {
        self.poller.subscribe(scope, since)
    }

    /// Register a subscription that only polls through
    /// [`sync_once`](Self::sync_once).
    pub fn register(&self, scope: PollScope, since: Option<DateTime<Utc>>) -> SubscriptionHandle {
        self.poller.register(scope, since)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.poller.unsubscribe(handle)
    }

    /// Poll one subscription and reconcile the result inline.
    ///
    /// # Errors
    ///
    /// The poll request's [`SyncError`].
    pub async fn sync_once(&self, handle: SubscriptionHandle) -> Result<IngestReport, SyncError> {
        match self.poller.fetch(handle).await? {
            PollOutcome::Delivered(batch) => Ok(self.pipeline.process(&batch).await),
            PollOutcome::Skipped | PollOutcome::Unsubscribed => Ok(IngestReport::default()),
        }
    }

    /// Point fetch of one entity into the store.
    ///
    /// # Errors
    ///
    /// See [`fetch_entity`].
    pub async fn fetch_entity(&self, entity: &EntityRef) -> Result<EntitySnapshot, SyncError> {
        fetch_entity(self.ctx.client.as_ref(), &self.store, entity).await
    }

    /// Run `f` with exclusive access to the notification log.
    pub fn with_notifications<R>(&self, f: impl FnOnce(&mut NotificationReconciler) -> R) -> R {
        f(&mut self.pipeline.reconciler())
    }

    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.pipeline.reconciler().notifications()
    }

    /// Stop every subscription and the pump. Idempotent.
    pub fn dispose(&self) {
        self.poller.shutdown();
        let pump = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pump) = pump {
            pump.abort();
            info!("synchronizer disposed");
        }
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        self.dispose();
    }
}
