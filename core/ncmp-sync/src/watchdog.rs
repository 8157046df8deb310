//! Background sync loops.
//!
//! Each cycle keeps pulling candidates from the [`SyncSelector`] until none
//! are left. A handle is attempted at most once per cycle; failures are
//! logged and left for the next cycle. Before touching a handle the watchdog
//! takes its in-flight marker in the shared cache so only one cluster member
//! works on it at a time.

use crate::cache::CoordinationCache;
use crate::dmi::{Datastore, DmiClient, DmiError};
use crate::error::{NcmpError, NcmpResult};
use crate::retry::record_failure;
use crate::selector::SyncSelector;
use crate::state_handler::StateHandler;
use chrono::Utc;
use ncmp_storage::OperationalDataRepository;
use ncmp_types::{CmHandle, CmHandleId, CmHandleState, LockReasonCategory};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Resource fetched for an operational data sync.
pub const ROOT_RESOURCE_IDENTIFIER: &str = "/";

/// What one watchdog cycle did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub synchronized: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl CycleReport {
    fn record(&mut self, id: &CmHandleId, result: NcmpResult<()>) {
        match result {
            Ok(()) => self.synchronized += 1,
            Err(NcmpError::AlreadyProcessing(_)) => {
                debug!("{id} is being synced by another member");
                self.skipped += 1;
            }
            Err(NcmpError::DataSyncDisabled(_)) => {
                info!("Skipping {id}: data sync is disabled");
                self.skipped += 1;
            }
            Err(NcmpError::Transport(e)) => {
                warn!("Sync of {id} failed, retrying next cycle: {e}");
                self.failed += 1;
            }
            Err(e) => {
                error!("Sync of {id} failed: {e}");
                self.failed += 1;
            }
        }
    }
}

/// Holds the in-flight marker of one handle until released.
struct InFlightMarker<'a> {
    cache: &'a dyn CoordinationCache<String>,
    id: CmHandleId,
}

impl<'a> InFlightMarker<'a> {
    async fn acquire(
        cache: &'a dyn CoordinationCache<String>,
        id: &CmHandleId,
        owner: &str,
        ttl: Duration,
    ) -> NcmpResult<Self> {
        if cache
            .put_if_absent(id.as_str(), owner.to_string(), Some(ttl))
            .await
        {
            Ok(Self {
                cache,
                id: id.clone(),
            })
        } else {
            Err(NcmpError::AlreadyProcessing(id.clone()))
        }
    }

    async fn release(self) {
        self.cache.remove(self.id.as_str()).await;
    }
}

/// Synchronizes operational data of READY handles.
pub struct DataSyncWatchdog {
    selector: SyncSelector,
    state_handler: Arc<StateHandler>,
    dmi: Arc<dyn DmiClient>,
    operational_data: Arc<dyn OperationalDataRepository>,
    in_flight: Arc<dyn CoordinationCache<String>>,
    instance_id: String,
    marker_ttl: Duration,
}

impl DataSyncWatchdog {
    pub fn new(
        selector: SyncSelector,
        state_handler: Arc<StateHandler>,
        dmi: Arc<dyn DmiClient>,
        operational_data: Arc<dyn OperationalDataRepository>,
        in_flight: Arc<dyn CoordinationCache<String>>,
        instance_id: impl Into<String>,
        marker_ttl: Duration,
    ) -> Self {
        Self {
            selector,
            state_handler,
            dmi,
            operational_data,
            in_flight,
            instance_id: instance_id.into(),
            marker_ttl,
        }
    }

    /// Runs one cycle until no unvisited candidate is left.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        let mut visited = HashSet::new();

        loop {
            let handle = match self.selector.pick_unsynchronized_ready(&visited) {
                Ok(Some(handle)) => handle,
                Ok(None) => break,
                Err(e) => {
                    error!("Could not select a cm handle for data sync: {e}");
                    break;
                }
            };
            visited.insert(handle.id.clone());
            let result = self.sync_handle(&handle).await;
            report.record(&handle.id, result);
        }

        if report != CycleReport::default() {
            info!(
                "Data sync cycle: {} synchronized, {} skipped, {} failed",
                report.synchronized, report.skipped, report.failed
            );
        }
        report
    }

    async fn sync_handle(&self, handle: &CmHandle) -> NcmpResult<()> {
        let marker = InFlightMarker::acquire(
            self.in_flight.as_ref(),
            &handle.id,
            &self.instance_id,
            self.marker_ttl,
        )
        .await?;
        let result = self.sync_operational_data(handle).await;
        marker.release().await;
        result
    }

    async fn sync_operational_data(&self, handle: &CmHandle) -> NcmpResult<()> {
        if !handle.composite_state.data_sync_enabled {
            return Err(NcmpError::DataSyncDisabled(handle.id.clone()));
        }

        let body = self
            .dmi
            .read(handle, ROOT_RESOURCE_IDENTIFIER, Datastore::PassthroughOperational)
            .await?
            .into_success_body()?;
        let data: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| DmiError::InvalidBody(e.to_string()))?;
        let first = first_top_level_member(&data).ok_or_else(|| {
            DmiError::InvalidBody("resource data has no top-level member".to_string())
        })?;

        self.operational_data.save_data(&handle.id, &first)?;
        self.state_handler.mark_operational_synchronized(&handle.id)?;
        debug!("Synchronized operational data of {}", handle.id);
        Ok(())
    }
}

/// The first member of a JSON object, as an object of its own.
#[must_use]
pub fn first_top_level_member(data: &serde_json::Value) -> Option<serde_json::Value> {
    let (name, value) = data.as_object()?.iter().next()?;
    let mut member = serde_json::Map::new();
    member.insert(name.clone(), value.clone());
    Some(serde_json::Value::Object(member))
}

/// Syncs module references of ADVISED handles and re-advises locked
/// handles whose retry backoff has elapsed.
pub struct ModuleSyncWatchdog {
    selector: SyncSelector,
    state_handler: Arc<StateHandler>,
    dmi: Arc<dyn DmiClient>,
    operational_data: Arc<dyn OperationalDataRepository>,
    in_flight: Arc<dyn CoordinationCache<String>>,
    instance_id: String,
    marker_ttl: Duration,
    retry_base: Duration,
}

impl ModuleSyncWatchdog {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        selector: SyncSelector,
        state_handler: Arc<StateHandler>,
        dmi: Arc<dyn DmiClient>,
        operational_data: Arc<dyn OperationalDataRepository>,
        in_flight: Arc<dyn CoordinationCache<String>>,
        instance_id: impl Into<String>,
        marker_ttl: Duration,
        retry_base: Duration,
    ) -> Self {
        Self {
            selector,
            state_handler,
            dmi,
            operational_data,
            in_flight,
            instance_id: instance_id.into(),
            marker_ttl,
            retry_base,
        }
    }

    /// Re-advises retryable locked handles, then syncs ADVISED handles.
    pub async fn run_cycle(&self) -> CycleReport {
        self.reset_locked_for_retry();

        let mut report = CycleReport::default();
        let mut visited = HashSet::new();
        loop {
            let handle = match self.selector.pick_advised(&visited) {
                Ok(Some(handle)) => handle,
                Ok(None) => break,
                Err(e) => {
                    error!("Could not select a cm handle for module sync: {e}");
                    break;
                }
            };
            visited.insert(handle.id.clone());
            let result = self.sync_handle(handle.clone()).await;
            report.record(&handle.id, result);
        }

        if report != CycleReport::default() {
            info!(
                "Module sync cycle: {} ready, {} skipped, {} failed",
                report.synchronized, report.skipped, report.failed
            );
        }
        report
    }

    /// LOCKED -> ADVISED for every handle whose backoff has elapsed.
    /// Returns how many handles were re-advised.
    pub fn reset_locked_for_retry(&self) -> usize {
        let handles = match self.selector.pick_locked_for_retry(Utc::now(), self.retry_base) {
            Ok(handles) => handles,
            Err(e) => {
                error!("Could not select locked cm handles for retry: {e}");
                return 0;
            }
        };
        if handles.is_empty() {
            return 0;
        }

        let batch = handles
            .into_iter()
            .map(|h| (h, CmHandleState::Advised))
            .collect();
        let result = self.state_handler.apply_batch(batch);
        debug!("Re-advised {} locked cm handles", result.committed.len());
        result.committed.len()
    }

    async fn sync_handle(&self, handle: CmHandle) -> NcmpResult<()> {
        let marker = InFlightMarker::acquire(
            self.in_flight.as_ref(),
            &handle.id,
            &self.instance_id,
            self.marker_ttl,
        )
        .await?;
        let result = self.sync_modules(handle).await;
        marker.release().await;
        result
    }

    async fn sync_modules(&self, mut handle: CmHandle) -> NcmpResult<()> {
        match self.dmi.get_module_references(&handle).await {
            Ok(modules) => {
                self.operational_data
                    .save_module_references(&handle.id, &modules)?;
                debug!("Stored {} modules for {}", modules.len(), handle.id);
                self.commit(handle, CmHandleState::Ready)
            }
            Err(e) => {
                let reason = record_failure(
                    &handle.composite_state,
                    LockReasonCategory::ModuleSyncFailed,
                    e.to_string(),
                );
                debug!("Locking {}: {}", handle.id, reason.details());
                handle.composite_state.lock_reason = Some(reason);
                self.commit(handle, CmHandleState::Locked)?;
                Err(e.into())
            }
        }
    }

    fn commit(&self, handle: CmHandle, target: CmHandleState) -> NcmpResult<()> {
        let mut result = self.state_handler.apply_batch(vec![(handle, target)]);
        match result.failed.pop() {
            Some((_, e)) => Err(e),
            None => Ok(()),
        }
    }
}
