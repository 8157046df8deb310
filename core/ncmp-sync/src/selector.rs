//! Picks handles for background sync work.
//!
//! Many cluster members poll the same store. Candidates are chosen at random
//! so they do not all contend for the head of the same list.

use crate::error::NcmpResult;
use crate::retry::is_ready_for_retry;
use chrono::{DateTime, Utc};
use ncmp_storage::{HandleStore, StorageError};
use ncmp_types::{CmHandle, CmHandleId, CmHandleState, DataStoreSyncState, LockReasonCategory};
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct SyncSelector {
    store: Arc<dyn HandleStore>,
}

impl SyncSelector {
    pub fn new(store: Arc<dyn HandleStore>) -> Self {
        Self { store }
    }

    /// A random ADVISED handle not in `exclude`.
    pub fn pick_advised(&self, exclude: &HashSet<CmHandleId>) -> NcmpResult<Option<CmHandle>> {
        let candidates: Vec<CmHandle> = self
            .store
            .get_by_state(CmHandleState::Advised)?
            .into_iter()
            .filter(|h| !exclude.contains(&h.id))
            .collect();
        Ok(candidates.choose(&mut rand::thread_rng()).cloned())
    }

    /// A random handle with an unsynchronized operational datastore that is
    /// READY when re-read.
    ///
    /// The state is checked again after shuffling because another member may
    /// have moved the handle since the candidates were listed.
    pub fn pick_unsynchronized_ready(
        &self,
        exclude: &HashSet<CmHandleId>,
    ) -> NcmpResult<Option<CmHandle>> {
        let mut candidates: Vec<CmHandleId> = self
            .store
            .get_by_operational_sync_state(DataStoreSyncState::Unsynchronized)?
            .into_iter()
            .map(|h| h.id)
            .filter(|id| !exclude.contains(id))
            .collect();
        candidates.shuffle(&mut rand::thread_rng());

        for id in candidates {
            match self.store.get_by_id(&id) {
                Ok(handle) if handle.state() == CmHandleState::Ready => return Ok(Some(handle)),
                Ok(_) | Err(StorageError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Every LOCKED handle whose lock reason says it misbehaved.
    pub fn pick_misbehaving_locked(&self) -> NcmpResult<Vec<CmHandle>> {
        Ok(self
            .store
            .get_by_lock_reason_category(LockReasonCategory::LockedMisbehaving)?)
    }

    /// LOCKED handles with a retryable lock reason whose backoff has
    /// elapsed at `now`.
    pub fn pick_locked_for_retry(
        &self,
        now: DateTime<Utc>,
        base: Duration,
    ) -> NcmpResult<Vec<CmHandle>> {
        let mut ready = Vec::new();
        for category in [
            LockReasonCategory::ModuleSyncFailed,
            LockReasonCategory::ModuleUpgradeFailed,
        ] {
            ready.extend(
                self.store
                    .get_by_lock_reason_category(category)?
                    .into_iter()
                    .filter(|h| is_ready_for_retry(&h.composite_state, now, base)),
            );
        }
        Ok(ready)
    }
}
