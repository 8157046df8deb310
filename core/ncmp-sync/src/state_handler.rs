//! The single writer of CM handle state.
//!
//! Every lifecycle change goes through [`StateHandler`]. A batch is applied
//! handle by handle: each update is atomic on its own, failures are reported
//! per handle and never abort the rest of the batch. Committed transitions
//! are published as [`LcmEvent`]s.

use crate::error::{NcmpError, NcmpResult};
use crate::events::{EventPublisher, NcmpEvent};
use ncmp_storage::{HandleStore, OperationalDataRepository, StorageError};
use ncmp_types::{
    CmHandle, CmHandleId, CmHandleState, CompositeState, DataStoreSyncState, LcmEvent,
    OperationalDataStore,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-handle outcome of a batch.
#[derive(Debug, Default)]
pub struct BatchResult {
    /// Handles whose transition was committed and published.
    pub committed: Vec<CmHandleId>,
    /// Handles already in the requested state.
    pub unchanged: Vec<CmHandleId>,
    pub failed: Vec<(CmHandleId, NcmpError)>,
}

impl BatchResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// The failure recorded for `id`, if any.
    #[must_use]
    pub fn error_for(&self, id: &CmHandleId) -> Option<&NcmpError> {
        self.failed
            .iter()
            .find(|(failed, _)| failed == id)
            .map(|(_, e)| e)
    }

    /// Whether `id` ended up in the requested state.
    #[must_use]
    pub fn reached_target(&self, id: &CmHandleId) -> bool {
        self.committed.contains(id) || self.unchanged.contains(id)
    }
}

pub struct StateHandler {
    store: Arc<dyn HandleStore>,
    operational_data: Arc<dyn OperationalDataRepository>,
    publisher: Arc<dyn EventPublisher>,
    lcm_topic: String,
}

impl StateHandler {
    pub fn new(
        store: Arc<dyn HandleStore>,
        operational_data: Arc<dyn OperationalDataRepository>,
        publisher: Arc<dyn EventPublisher>,
        lcm_topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            operational_data,
            publisher,
            lcm_topic: lcm_topic.into(),
        }
    }

    /// Stores brand-new handles in ADVISED.
    ///
    /// Ids that already exist fail with [`NcmpError::AlreadyExists`]; the
    /// other handles of the batch are still stored.
    pub fn register_batch(&self, handles: Vec<CmHandle>) -> BatchResult {
        let mut result = BatchResult::default();
        let mut accepted = Vec::with_capacity(handles.len());

        for mut handle in handles {
            if handle.state() != CmHandleState::Advised {
                let from = handle.state();
                result.failed.push((
                    handle.id.clone(),
                    NcmpError::IllegalTransition {
                        id: handle.id,
                        from,
                        to: CmHandleState::Advised,
                    },
                ));
                continue;
            }
            handle.composite_state.lock_reason = None;
            handle.composite_state.touch();
            accepted.push(handle);
        }

        let duplicates: HashSet<CmHandleId> = match self.store.insert_batch(&accepted) {
            Ok(()) => HashSet::new(),
            Err(StorageError::AlreadyExists(dups)) => dups.into_iter().collect(),
            Err(e) => {
                warn!("Failed to register {} cm handles: {e}", accepted.len());
                let message = e.to_string();
                for handle in accepted {
                    result
                        .failed
                        .push((handle.id, NcmpError::BatchFailed(message.clone())));
                }
                return result;
            }
        };

        for handle in accepted {
            if duplicates.contains(&handle.id) {
                result
                    .failed
                    .push((handle.id.clone(), NcmpError::AlreadyExists(handle.id)));
                continue;
            }
            self.publish(LcmEvent::new(
                handle.id.clone(),
                None,
                CmHandleState::Advised,
            ));
            result.committed.push(handle.id);
        }

        info!(
            "Registered {} cm handles ({} failed)",
            result.committed.len(),
            result.failed.len()
        );
        result
    }

    /// Moves existing handles to new states.
    ///
    /// The supplied handle is the caller's snapshot. It provides the lock
    /// reason for a LOCKED target and the prior state for DELETED, whose
    /// record has already been removed.
    pub fn apply_batch(&self, batch: Vec<(CmHandle, CmHandleState)>) -> BatchResult {
        let mut result = BatchResult::default();

        for (handle, target) in batch {
            let id = handle.id.clone();
            match self.apply_one(handle, target) {
                Ok(Some(event)) => {
                    self.publish(event);
                    result.committed.push(id);
                }
                Ok(None) => result.unchanged.push(id),
                Err(e) => {
                    warn!("State update to {target} failed for {id}: {e}");
                    result.failed.push((id, e));
                }
            }
        }
        result
    }

    fn apply_one(
        &self,
        snapshot: CmHandle,
        target: CmHandleState,
    ) -> NcmpResult<Option<LcmEvent>> {
        if target == CmHandleState::Deleted {
            return self.complete_deletion(snapshot);
        }

        let current = self.store.get_state(&snapshot.id)?;
        let from = current.cm_handle_state;
        if from == target {
            debug!("{} is already {target}", snapshot.id);
            return Ok(None);
        }
        if !from.can_transition_to(target) {
            return Err(NcmpError::IllegalTransition {
                id: snapshot.id,
                from,
                to: target,
            });
        }

        let next = Self::next_state(&snapshot, current, target)?;
        self.save_from(&snapshot.id, from, &next)?;
        debug!("{} moved {from} -> {target}", snapshot.id);
        Ok(Some(LcmEvent::new(snapshot.id, Some(from), target)))
    }

    fn next_state(
        snapshot: &CmHandle,
        current: CompositeState,
        target: CmHandleState,
    ) -> NcmpResult<CompositeState> {
        let from = current.cm_handle_state;
        let mut next = current;
        next.cm_handle_state = target;

        next.lock_reason = match target {
            CmHandleState::Locked => Some(
                snapshot
                    .composite_state
                    .lock_reason
                    .clone()
                    .ok_or_else(|| NcmpError::MissingLockReason(snapshot.id.clone()))?,
            ),
            // Re-advised handles keep their reason so the attempt count
            // carries into the next failure.
            CmHandleState::Advised if from == CmHandleState::Locked => next.lock_reason.take(),
            _ => None,
        };

        if target == CmHandleState::Ready {
            next.data_stores.operational = OperationalDataStore {
                sync_state: DataStoreSyncState::initial(next.data_sync_enabled),
                last_sync_time: None,
            };
        }
        next.touch();
        Ok(next)
    }

    /// DELETING -> DELETED. The record is gone, so only the snapshot is
    /// checked and nothing is written.
    fn complete_deletion(&self, snapshot: CmHandle) -> NcmpResult<Option<LcmEvent>> {
        let from = snapshot.state();
        if !from.can_transition_to(CmHandleState::Deleted) {
            return Err(NcmpError::IllegalTransition {
                id: snapshot.id,
                from,
                to: CmHandleState::Deleted,
            });
        }
        Ok(Some(LcmEvent::new(
            snapshot.id,
            Some(from),
            CmHandleState::Deleted,
        )))
    }

    /// Records a completed operational data sync for a READY handle.
    pub fn mark_operational_synchronized(&self, id: &CmHandleId) -> NcmpResult<()> {
        let mut state = self.store.get_state(id)?;
        if state.cm_handle_state != CmHandleState::Ready {
            return Err(NcmpError::InvalidState {
                id: id.clone(),
                state: state.cm_handle_state,
            });
        }
        state.set_operational_synchronized();
        self.save_from(id, CmHandleState::Ready, &state)?;
        debug!("{id} operational datastore synchronized");
        Ok(())
    }

    /// Turns operational data sync on or off for a READY handle.
    ///
    /// Disabling a synchronized handle drops its stored operational data.
    pub fn set_data_sync_enabled(&self, id: &CmHandleId, enabled: bool) -> NcmpResult<()> {
        let mut state = self.store.get_state(id)?;
        if state.data_sync_enabled == enabled {
            debug!("Data sync for {id} already {enabled}");
            return Ok(());
        }
        if state.cm_handle_state != CmHandleState::Ready {
            return Err(NcmpError::InvalidState {
                id: id.clone(),
                state: state.cm_handle_state,
            });
        }

        let drop_data =
            !enabled && state.operational_sync_state() == DataStoreSyncState::Synchronized;
        state.set_data_sync_enabled(enabled);
        self.save_from(id, CmHandleState::Ready, &state)?;
        if drop_data {
            self.operational_data.delete_data(id)?;
        }
        info!("Data sync for {id} set to {enabled}");
        Ok(())
    }

    /// Writes `next` unless another writer moved the handle out of `from`
    /// since it was read.
    fn save_from(
        &self,
        id: &CmHandleId,
        from: CmHandleState,
        next: &CompositeState,
    ) -> NcmpResult<()> {
        if self.store.save_state_if(id, from, next)? {
            Ok(())
        } else {
            Err(NcmpError::ConcurrentModification {
                id: id.clone(),
                expected: from,
            })
        }
    }

    fn publish(&self, event: LcmEvent) {
        let key = event.cm_handle_id.to_string();
        self.publisher
            .publish(&self.lcm_topic, &key, NcmpEvent::Lcm(event));
    }
}
