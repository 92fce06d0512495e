//! Timer-driven change polling.
//!
//! Each subscription owns a cursor and, when started inside a tokio runtime,
//! a timer task. A tick issues `GET <scope>/updates?since=<cursor>`, parses
//! the change events, advances the cursor and hands the batch to the channel
//! returned by [`ChangePoller::new`].
//!
//! A subscription never has two polls in flight: the timer waits for each
//! poll to finish before scheduling the next tick, and a manual
//! [`ChangePoller::poll_once`] that overlaps a running poll is skipped.
//! Results that arrive after [`ChangePoller::unsubscribe`] are discarded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use super::cursor::Cursor;
use super::event::ChangeEvent;
use crate::client::RequestClient;
use crate::config::PollConfig;
use crate::error::SyncError;
use crate::model::{EntityId, EntityKind, EntityRef};

/// What a subscription watches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PollScope {
    /// Every entity of one kind: `/<resource>/updates`.
    Kind(EntityKind),
    /// One entity: `/<resource>/<id>/updates`.
    Entity(EntityRef),
}

impl PollScope {
    #[must_use]
    pub fn entity(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        Self::Entity(EntityRef::new(kind, id))
    }

    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Kind(kind) => *kind,
            Self::Entity(entity) => entity.kind,
        }
    }

    /// Updates route for this scope, without the query string.
    #[must_use]
    pub fn route(&self) -> String {
        match self {
            Self::Kind(kind) => format!("/{}/updates", kind.resource()),
            Self::Entity(entity) => format!("{}/updates", entity.path()),
        }
    }

    #[must_use]
    pub fn request_path(&self, cursor: Cursor) -> String {
        format!("{}?since={}", self.route(), cursor.to_query())
    }
}

impl std::fmt::Display for PollScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kind(kind) => write!(f, "{kind}:*"),
            Self::Entity(entity) => write!(f, "{entity}"),
        }
    }
}

/// Opaque subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Events from one successful poll.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    pub handle: SubscriptionHandle,
    pub scope: PollScope,
    pub events: Vec<ChangeEvent>,
    /// Cursor after this batch was applied.
    pub cursor: Cursor,
}

/// Result of a single poll attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Delivered(ChangeBatch),
    /// Another poll for the same subscription was still in flight.
    Skipped,
    /// The subscription is gone, or went away while the request was out.
    Unsubscribed,
}

struct Subscription {
    scope: PollScope,
    cursor: Cursor,
    in_flight: bool,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct PollerState {
    subscriptions: HashMap<SubscriptionHandle, Subscription>,
    next_handle: u64,
}

struct Shared {
    client: Arc<dyn RequestClient>,
    config: PollConfig,
    state: Mutex<PollerState>,
    sink: mpsc::UnboundedSender<ChangeBatch>,
}

/// Cloneable handle to the poller.
#[derive(Clone)]
pub struct ChangePoller {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ChangePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangePoller")
            .field("subscriptions", &self.lock().subscriptions.len())
            .finish_non_exhaustive()
    }
}

impl ChangePoller {
    /// Create a poller and the receiving end of its batch channel.
    #[must_use]
    pub fn new(
        client: Arc<dyn RequestClient>,
        config: PollConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ChangeBatch>) {
        let (sink, batches) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            client,
            config,
            state: Mutex::new(PollerState::default()),
            sink,
        });
        (Self { shared }, batches)
    }

    fn lock(&self) -> MutexGuard<'_, PollerState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscription without a timer; drive it with
    /// [`poll_once`](Self::poll_once) or [`fetch`](Self::fetch).
    ///
    /// The cursor starts at `since`, or at the current time.
    pub fn register(&self, scope: PollScope, since: Option<DateTime<Utc>>) -> SubscriptionHandle {
        let cursor = since.map_or_else(Cursor::now, Cursor::new);
        let mut state = self.lock();
        state.next_handle += 1;
        let handle = SubscriptionHandle(state.next_handle);
        debug!(%handle, %scope, %cursor, "subscription registered");
        state.subscriptions.insert(
            handle,
            Subscription {
                scope,
                cursor,
                in_flight: false,
                timer: None,
            },
        );
        handle
    }

    /// Register a subscription and start its timer.
    ///
    /// The first poll fires immediately, then every
    /// [`PollConfig::interval_for`] the scope's kind. Outside a tokio runtime
    /// no timer is started and the subscription behaves like
    /// [`register`](Self::register).
    pub fn subscribe(&self, scope: PollScope, since: Option<DateTime<Utc>>) -> SubscriptionHandle {
        let period = self.shared.config.interval_for(scope.kind());
        let handle = self.register(scope, since);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(%handle, "no async runtime; subscription will only poll on demand");
            return handle;
        };
        let timer = runtime.spawn(run_timer(Arc::downgrade(&self.shared), handle, period));
        if let Some(sub) = self.lock().subscriptions.get_mut(&handle) {
            sub.timer = Some(timer);
        } else {
            timer.abort();
        }
        handle
    }

    /// Stop a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let Some(sub) = self.lock().subscriptions.remove(&handle) else {
            return false;
        };
        if let Some(timer) = sub.timer {
            timer.abort();
        }
        debug!(%handle, scope = %sub.scope, "subscription closed");
        true
    }

    /// Stop every subscription.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.lock().subscriptions.drain().collect();
        for (handle, sub) in drained {
            if let Some(timer) = sub.timer {
                timer.abort();
            }
            trace!(%handle, "subscription closed on shutdown");
        }
    }

    #[must_use]
    pub fn cursor(&self, handle: SubscriptionHandle) -> Option<Cursor> {
        self.lock().subscriptions.get(&handle).map(|sub| sub.cursor)
    }

    /// Live subscriptions ordered by handle.
    #[must_use]
    pub fn active_subscriptions(&self) -> Vec<(SubscriptionHandle, PollScope)> {
        let mut out: Vec<_> = self
            .lock()
            .subscriptions
            .iter()
            .map(|(handle, sub)| (*handle, sub.scope.clone()))
            .collect();
        out.sort_by_key(|(handle, _)| *handle);
        out
    }

    /// Poll once and return the batch to the caller instead of the channel.
    ///
    /// # Errors
    ///
    /// The request's [`SyncError`]; the cursor is left unchanged.
    pub async fn fetch(&self, handle: SubscriptionHandle) -> Result<PollOutcome, SyncError> {
        let (scope, cursor) = {
            let mut state = self.lock();
            let Some(sub) = state.subscriptions.get_mut(&handle) else {
                return Ok(PollOutcome::Unsubscribed);
            };
            if sub.in_flight {
                trace!(%handle, "poll already in flight");
                return Ok(PollOutcome::Skipped);
            }
            sub.in_flight = true;
            (sub.scope.clone(), sub.cursor)
        };
        let in_flight = InFlight {
            shared: &self.shared,
            handle,
        };

        let path = scope.request_path(cursor);
        trace!(%handle, %path, "polling");
        let response = self.shared.client.get(&path).await;
        drop(in_flight);

        let mut state = self.lock();
        let Some(sub) = state.subscriptions.get_mut(&handle) else {
            debug!(%handle, "discarding poll result for closed subscription");
            return Ok(PollOutcome::Unsubscribed);
        };

        if !response.success {
            return Err(SyncError::from_response(response, None));
        }
        let events = ChangeEvent::parse_batch(response.data.as_ref());
        sub.cursor.advance_past(&events);
        Ok(PollOutcome::Delivered(ChangeBatch {
            handle,
            scope,
            events,
            cursor: sub.cursor,
        }))
    }

    /// Poll once and push any events onto the batch channel.
    ///
    /// Returns the number of events delivered.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn poll_once(&self, handle: SubscriptionHandle) -> Result<usize, SyncError> {
        let PollOutcome::Delivered(batch) = self.fetch(handle).await? else {
            return Ok(0);
        };
        let count = batch.events.len();
        if count > 0 && self.shared.sink.send(batch).is_err() {
            debug!(%handle, "batch receiver dropped");
        }
        Ok(count)
    }
}

/// Clears a subscription's in-flight flag when the poll finishes or its
/// future is dropped mid-request.
struct InFlight<'a> {
    shared: &'a Shared,
    handle: SubscriptionHandle,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sub) = state.subscriptions.get_mut(&self.handle) {
            sub.in_flight = false;
        }
    }
}

async fn run_timer(shared: Weak<Shared>, handle: SubscriptionHandle, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let poller = ChangePoller { shared };
        match poller.poll_once(handle).await {
            Ok(count) => trace!(%handle, count, "poll complete"),
            Err(err) => warn!(%handle, error = %err, "poll failed; retrying next tick"),
        }
        if poller.cursor(handle).is_none() {
            break;
        }
    }
}
