//! In-memory entity store with optimistic patches.
//!
//! The store is the single shared mutable resource of the sync layer. It
//! holds one full [`EntitySnapshot`] per `(kind, id)`; every write replaces
//! the whole snapshot, never individual fields.
//!
//! # Optimistic patches
//!
//! [`EntityStore::apply_optimistic`] overlays a patch immediately and returns
//! a [`RollbackToken`]. The token is later either confirmed or rolled back.
//! Rolling back restores the exact pre-patch snapshot. Rolling back a token
//! that is already settled is a no-op, and a token is settled by any of:
//!
//! - [`EntityStore::confirm`],
//! - an earlier [`EntityStore::rollback`] of the same token,
//! - an [`EntityStore::upsert`] of a server snapshot for the same entity,
//!   which supersedes every pending patch on it.
//!
//! The last rule keeps a slow failure from reverting newer server state that
//! a poll has already delivered.
//!
//! # Observers
//!
//! Observers run synchronously after each change, in subscription order, with
//! the store unlocked so they may read from it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::model::{EntityId, EntityKind, EntityRef, EntitySnapshot};

/// Handle for undoing one optimistic patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RollbackToken(u64);

/// Handle returned by [`EntityStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// A change delivered to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    Upserted(EntitySnapshot),
    Patched {
        token: RollbackToken,
        snapshot: EntitySnapshot,
    },
    RolledBack {
        token: RollbackToken,
        snapshot: EntitySnapshot,
    },
    Removed(EntityRef),
}

impl StoreChange {
    #[must_use]
    pub fn entity(&self) -> EntityRef {
        match self {
            Self::Upserted(snapshot)
            | Self::Patched { snapshot, .. }
            | Self::RolledBack { snapshot, .. } => snapshot.entity_ref(),
            Self::Removed(entity) => entity.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{0} is not in the store")]
    NotLoaded(EntityRef),
}

type Observer = Arc<dyn Fn(&StoreChange) + Send + Sync>;

#[derive(Debug, Clone)]
struct PendingPatch {
    entity: EntityRef,
    before: EntitySnapshot,
}

#[derive(Default)]
struct StoreState {
    entities: HashMap<EntityRef, EntitySnapshot>,
    pending: BTreeMap<RollbackToken, PendingPatch>,
    observers: Vec<(ObserverId, Observer)>,
    next_token: u64,
    next_observer: u64,
}

impl StoreState {
    fn observers(&self) -> Vec<Observer> {
        self.observers.iter().map(|(_, o)| Arc::clone(o)).collect()
    }

    fn settle_entity(&mut self, entity: &EntityRef) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, patch| patch.entity != *entity);
        before - self.pending.len()
    }
}

/// Cloneable handle to the shared store.
#[derive(Clone, Default)]
pub struct EntityStore {
    state: Arc<Mutex<StoreState>>,
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("EntityStore")
            .field("entities", &state.entities.len())
            .field("pending", &state.pending.len())
            .field("observers", &state.observers.len())
            .finish()
    }
}

impl EntityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // Every mutation is a single map operation, so a poisoned guard still
        // holds a consistent map.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(observers: &[Observer], change: &StoreChange) {
        for observer in observers {
            observer(change);
        }
    }

    #[must_use]
    pub fn get(&self, entity: &EntityRef) -> Option<EntitySnapshot> {
        self.lock().entities.get(entity).cloned()
    }

    #[must_use]
    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.lock().entities.contains_key(entity)
    }

    /// Insert or replace the full snapshot. Returns the previous snapshot.
    pub fn upsert(&self, snapshot: EntitySnapshot) -> Option<EntitySnapshot> {
        let entity = snapshot.entity_ref();
        let (previous, observers) = {
            let mut state = self.lock();
            let settled = state.settle_entity(&entity);
            if settled > 0 {
                debug!(%entity, settled, "server snapshot superseded optimistic patches");
            }
            let previous = state.entities.insert(entity.clone(), snapshot.clone());
            (previous, state.observers())
        };
        trace!(%entity, replaced = previous.is_some(), "upsert");
        Self::notify(&observers, &StoreChange::Upserted(snapshot));
        previous
    }

    /// Drop an entity and any pending patches on it.
    pub fn remove(&self, entity: &EntityRef) -> Option<EntitySnapshot> {
        let (removed, observers) = {
            let mut state = self.lock();
            state.settle_entity(entity);
            (state.entities.remove(entity), state.observers())
        };
        if removed.is_some() {
            trace!(%entity, "remove");
            Self::notify(&observers, &StoreChange::Removed(entity.clone()));
        }
        removed
    }

    /// Replace only the status, as a full-snapshot upsert.
    pub fn set_status(&self, entity: &EntityRef, status: &str) -> Option<EntitySnapshot> {
        let current = self.get(entity)?;
        let next = current.with_status(status);
        self.upsert(next.clone());
        Some(next)
    }

    /// Overlay `patch` before the server confirms it.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotLoaded`] when the entity has no snapshot to patch.
    pub fn apply_optimistic(
        &self,
        entity: &EntityRef,
        patch: &Map<String, Value>,
    ) -> Result<RollbackToken, StoreError> {
        let (token, snapshot, observers) = {
            let mut state = self.lock();
            let before = state
                .entities
                .get(entity)
                .cloned()
                .ok_or_else(|| StoreError::NotLoaded(entity.clone()))?;
            let patched = before.merged(patch);
            state.next_token += 1;
            let token = RollbackToken(state.next_token);
            state.pending.insert(
                token,
                PendingPatch {
                    entity: entity.clone(),
                    before,
                },
            );
            state.entities.insert(entity.clone(), patched.clone());
            (token, patched, state.observers())
        };
        debug!(%entity, ?token, "optimistic patch applied");
        Self::notify(&observers, &StoreChange::Patched { token, snapshot });
        Ok(token)
    }

    /// Mark a patch as accepted by the server. Returns `false` if it was
    /// already settled.
    pub fn confirm(&self, token: RollbackToken) -> bool {
        self.lock().pending.remove(&token).is_some()
    }

    /// Restore the snapshot captured before `token`'s patch.
    ///
    /// Later patches on the same entity are discarded with it, since they were
    /// layered on top of the state being undone. Returns `false` (and changes
    /// nothing) when the token is already settled.
    pub fn rollback(&self, token: RollbackToken) -> bool {
        let (snapshot, observers) = {
            let mut state = self.lock();
            let Some(patch) = state.pending.remove(&token) else {
                trace!(?token, "rollback of settled patch ignored");
                return false;
            };
            let entity = patch.entity.clone();
            state
                .pending
                .retain(|later, pending| *later < token || pending.entity != entity);
            state.entities.insert(entity, patch.before.clone());
            (patch.before, state.observers())
        };
        debug!(entity = %snapshot.entity_ref(), ?token, "optimistic patch rolled back");
        Self::notify(&observers, &StoreChange::RolledBack { token, snapshot });
        true
    }

    #[must_use]
    pub fn is_pending(&self, token: RollbackToken) -> bool {
        self.lock().pending.contains_key(&token)
    }

    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&StoreChange) + Send + Sync + 'static,
    {
        let mut state = self.lock();
        state.next_observer += 1;
        let id = ObserverId(state.next_observer);
        state.observers.push((id, Arc::new(observer)));
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut state = self.lock();
        let before = state.observers.len();
        state.observers.retain(|(existing, _)| *existing != id);
        state.observers.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entities.is_empty()
    }

    /// Ids of one kind, sorted.
    #[must_use]
    pub fn ids(&self, kind: EntityKind) -> Vec<EntityId> {
        let mut out: Vec<EntityId> = self
            .lock()
            .entities
            .keys()
            .filter(|entity| entity.kind == kind)
            .map(|entity| entity.id.clone())
            .collect();
        out.sort();
        out
    }

    /// Snapshots of one kind, ordered by id.
    #[must_use]
    pub fn snapshots(&self, kind: EntityKind) -> Vec<EntitySnapshot> {
        let mut out: Vec<EntitySnapshot> = self
            .lock()
            .entities
            .values()
            .filter(|snapshot| snapshot.kind() == kind)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id().cmp(b.id()));
        out
    }
}
