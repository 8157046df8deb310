//! Plugin registration: create, update and remove CM handles.

use crate::cache::CoordinationCache;
use crate::error::{NcmpError, NcmpResult};
use crate::state_handler::{BatchResult, StateHandler};
use ncmp_storage::{HandleStore, StorageError, StorageResult};
use ncmp_types::{
    CmHandle, CmHandleId, CmHandleRegistrationResponse, CmHandleState, DmiPluginRefs,
    DmiPluginRegistration, DmiPluginRegistrationResponse, NcmpServiceCmHandle, RegistrationError,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handles are deleted from the store in batches of this size.
pub const DELETE_BATCH_SIZE: usize = 100;

/// Applies property changes of `updated_cm_handles`.
pub trait PropertyHandler: Send + Sync {
    fn update_properties(
        &self,
        handles: &[NcmpServiceCmHandle],
    ) -> Vec<CmHandleRegistrationResponse>;
}

/// [`PropertyHandler`] that merges properties into the stored handle.
pub struct StorePropertyHandler {
    store: Arc<dyn HandleStore>,
}

impl StorePropertyHandler {
    pub fn new(store: Arc<dyn HandleStore>) -> Self {
        Self { store }
    }

    fn update_one(&self, update: &NcmpServiceCmHandle) -> CmHandleRegistrationResponse {
        let id = match CmHandleId::parse(&update.cm_handle_id) {
            Ok(id) => id,
            Err(_) => {
                return CmHandleRegistrationResponse::failure(
                    CmHandleId::new(&update.cm_handle_id),
                    RegistrationError::CmHandleInvalidId,
                );
            }
        };

        let mut handle = match self.store.get_by_id(&id) {
            Ok(handle) => handle,
            Err(StorageError::NotFound(_)) => {
                return CmHandleRegistrationResponse::failure(
                    id,
                    RegistrationError::CmHandleDoesNotExist,
                );
            }
            Err(e) => return CmHandleRegistrationResponse::unknown_failure(id, e.to_string()),
        };

        merge_properties(&mut handle.dmi_properties, &update.dmi_properties);
        merge_properties(&mut handle.public_properties, &update.public_properties);

        match self.store.save(&handle) {
            Ok(()) => CmHandleRegistrationResponse::success(id),
            Err(e) => CmHandleRegistrationResponse::unknown_failure(id, e.to_string()),
        }
    }
}

impl PropertyHandler for StorePropertyHandler {
    fn update_properties(
        &self,
        handles: &[NcmpServiceCmHandle],
    ) -> Vec<CmHandleRegistrationResponse> {
        handles.iter().map(|h| self.update_one(h)).collect()
    }
}

/// `None` removes the property.
fn merge_properties(
    target: &mut BTreeMap<String, String>,
    changes: &BTreeMap<String, Option<String>>,
) {
    for (name, value) in changes {
        match value {
            Some(value) => {
                target.insert(name.clone(), value.clone());
            }
            None => {
                target.remove(name);
            }
        }
    }
}

fn present_properties(properties: &BTreeMap<String, Option<String>>) -> BTreeMap<String, String> {
    properties
        .iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
        .collect()
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Checks that exactly one endpoint form is given: either the combined
/// service, or both the data and the model service.
pub fn validate_plugin_refs(refs: &DmiPluginRefs) -> NcmpResult<()> {
    let combined = !is_blank(&refs.dmi_service_name);
    let data = !is_blank(&refs.dmi_data_service_name);
    let model = !is_blank(&refs.dmi_model_service_name);

    match (combined, data, model) {
        (true, false, false) | (false, true, true) => Ok(()),
        (false, false, false) => Err(NcmpError::Validation(
            "no DMI plugin service names given".to_string(),
        )),
        (true, _, _) => Err(NcmpError::Validation(
            "cannot register a combined DMI plugin together with data or model plugins"
                .to_string(),
        )),
        (false, _, _) => Err(NcmpError::Validation(
            "both a DMI data plugin and a DMI model plugin are required".to_string(),
        )),
    }
}

fn removal_failure(id: CmHandleId, err: &StorageError) -> CmHandleRegistrationResponse {
    match err {
        StorageError::NotFound(_) => {
            CmHandleRegistrationResponse::failure(id, RegistrationError::CmHandleDoesNotExist)
        }
        StorageError::InvalidId(_) => {
            CmHandleRegistrationResponse::failure(id, RegistrationError::CmHandleInvalidId)
        }
        other => CmHandleRegistrationResponse::unknown_failure(id, other.to_string()),
    }
}

fn creation_response(id: CmHandleId, result: &BatchResult) -> CmHandleRegistrationResponse {
    match result.error_for(&id) {
        None => CmHandleRegistrationResponse::success(id),
        Some(NcmpError::AlreadyExists(_)) => {
            CmHandleRegistrationResponse::failure(id, RegistrationError::CmHandleAlreadyExist)
        }
        Some(other) => {
            let text = other.to_string();
            CmHandleRegistrationResponse::unknown_failure(id, text)
        }
    }
}

/// Applies registration deltas sent by DMI plugins.
pub struct RegistrationCoordinator {
    store: Arc<dyn HandleStore>,
    state_handler: Arc<StateHandler>,
    property_handler: Arc<dyn PropertyHandler>,
    in_flight_markers: Vec<Arc<dyn CoordinationCache<String>>>,
}

impl RegistrationCoordinator {
    pub fn new(
        store: Arc<dyn HandleStore>,
        state_handler: Arc<StateHandler>,
        property_handler: Arc<dyn PropertyHandler>,
    ) -> Self {
        Self {
            store,
            state_handler,
            property_handler,
            in_flight_markers: Vec::new(),
        }
    }

    /// In-flight marker caches cleared when a handle is deleted.
    #[must_use]
    pub fn with_in_flight_markers(mut self, cache: Arc<dyn CoordinationCache<String>>) -> Self {
        self.in_flight_markers.push(cache);
        self
    }

    /// Validates the request once, then removes, creates and updates, in
    /// that order.
    pub async fn update_registration(
        &self,
        registration: &DmiPluginRegistration,
    ) -> NcmpResult<DmiPluginRegistrationResponse> {
        let refs = registration.plugin_refs();
        validate_plugin_refs(&refs)?;

        let removed_cm_handles = if registration.removed_cm_handles.is_empty() {
            Vec::new()
        } else {
            self.remove(&registration.removed_cm_handles).await
        };
        let created_cm_handles = if registration.created_cm_handles.is_empty() {
            Vec::new()
        } else {
            self.create(&refs, &registration.created_cm_handles)?
        };
        let updated_cm_handles = if registration.updated_cm_handles.is_empty() {
            Vec::new()
        } else {
            self.update(&registration.updated_cm_handles)
        };

        Ok(DmiPluginRegistrationResponse {
            created_cm_handles,
            updated_cm_handles,
            removed_cm_handles,
        })
    }

    /// Registers new handles in ADVISED.
    ///
    /// Invalid plugin references fail the whole request before anything is
    /// stored. Otherwise there is one response per requested handle.
    pub fn create(
        &self,
        refs: &DmiPluginRefs,
        handles: &[NcmpServiceCmHandle],
    ) -> NcmpResult<Vec<CmHandleRegistrationResponse>> {
        validate_plugin_refs(refs)?;

        // Slot per requested handle, filled either now (rejected) or after
        // the store has answered.
        let mut responses: Vec<Option<CmHandleRegistrationResponse>> =
            Vec::with_capacity(handles.len());
        let mut pending: Vec<(usize, CmHandleId)> = Vec::new();
        let mut to_register = Vec::new();
        let mut seen = HashSet::new();

        for (slot, requested) in handles.iter().enumerate() {
            let id = match CmHandleId::parse(&requested.cm_handle_id) {
                Ok(id) => id,
                Err(e) => {
                    debug!("Rejecting registration: {e}");
                    responses.push(Some(CmHandleRegistrationResponse::failure(
                        CmHandleId::new(&requested.cm_handle_id),
                        RegistrationError::CmHandleInvalidId,
                    )));
                    continue;
                }
            };
            if !seen.insert(id.clone()) {
                responses.push(Some(CmHandleRegistrationResponse::failure(
                    id,
                    RegistrationError::CmHandleAlreadyExist,
                )));
                continue;
            }

            let mut handle = CmHandle::advised(id.clone(), refs.clone());
            handle.dmi_properties = present_properties(&requested.dmi_properties);
            handle.public_properties = present_properties(&requested.public_properties);
            handle.module_set_tag = requested.module_set_tag.clone();
            handle.composite_state.data_sync_enabled =
                requested.data_sync_enabled.unwrap_or(false);

            responses.push(None);
            pending.push((slot, id));
            to_register.push(handle);
        }

        let result = self.state_handler.register_batch(to_register);
        for (slot, id) in pending {
            responses[slot] = Some(creation_response(id, &result));
        }

        info!(
            "Processed registration of {} cm handles ({} stored)",
            handles.len(),
            result.committed.len()
        );
        Ok(responses.into_iter().flatten().collect())
    }

    /// Applies property changes.
    pub fn update(&self, handles: &[NcmpServiceCmHandle]) -> Vec<CmHandleRegistrationResponse> {
        self.property_handler.update_properties(handles)
    }

    /// Removes handles: DELETING, batched delete with per-handle fallback,
    /// then DELETED for every handle that was actually removed.
    ///
    /// Handles whose deletion failed stay DELETING.
    pub async fn remove(&self, raw_ids: &[String]) -> Vec<CmHandleRegistrationResponse> {
        let ids: Vec<CmHandleId> = raw_ids.iter().map(CmHandleId::new).collect();

        let deleting = match self.mark_deleting(&ids) {
            Ok(deleting) => deleting,
            Err(e) => {
                warn!("Could not load cm handles to remove: {e}");
                let text = e.to_string();
                return ids
                    .into_iter()
                    .map(|id| CmHandleRegistrationResponse::unknown_failure(id, text.clone()))
                    .collect();
            }
        };

        let mut responses = Vec::with_capacity(ids.len());
        let mut removed = Vec::new();
        for batch in ids.chunks(DELETE_BATCH_SIZE) {
            self.delete_batch(batch, &mut responses, &mut removed).await;
        }

        let to_delete: Vec<_> = removed
            .iter()
            .filter_map(|id| deleting.get(id).cloned())
            .map(|handle| (handle, CmHandleState::Deleted))
            .collect();
        let result = self.state_handler.apply_batch(to_delete);

        info!(
            "Removed {} of {} cm handles ({} now DELETED)",
            removed.len(),
            ids.len(),
            result.committed.len()
        );
        responses
    }

    /// Marks every requested handle DELETING. Returns snapshots of the
    /// handles that are now DELETING.
    fn mark_deleting(
        &self,
        ids: &[CmHandleId],
    ) -> StorageResult<HashMap<CmHandleId, CmHandle>> {
        let snapshots = self.store.get_by_ids(ids)?;

        let batch = snapshots
            .iter()
            .map(|h| (h.clone(), CmHandleState::Deleting))
            .collect();
        let result = self.state_handler.apply_batch(batch);

        Ok(snapshots
            .into_iter()
            .filter(|h| result.reached_target(&h.id))
            .map(|mut h| {
                h.composite_state.cm_handle_state = CmHandleState::Deleting;
                (h.id.clone(), h)
            })
            .collect())
    }

    async fn delete_batch(
        &self,
        batch: &[CmHandleId],
        responses: &mut Vec<CmHandleRegistrationResponse>,
        removed: &mut Vec<CmHandleId>,
    ) {
        match self.store.delete_batch(batch) {
            Ok(()) => {
                for id in batch {
                    self.clear_markers(id).await;
                    responses.push(CmHandleRegistrationResponse::success(id.clone()));
                    removed.push(id.clone());
                }
            }
            Err(e) => {
                warn!(
                    "Batch delete of {} cm handles failed ({e}), retrying one by one",
                    batch.len()
                );
                for id in batch {
                    match self.store.delete_one(id) {
                        Ok(()) => {
                            self.clear_markers(id).await;
                            responses.push(CmHandleRegistrationResponse::success(id.clone()));
                            removed.push(id.clone());
                        }
                        Err(e) => {
                            debug!("Could not delete {id}: {e}");
                            responses.push(removal_failure(id.clone(), &e));
                        }
                    }
                }
            }
        }
    }

    async fn clear_markers(&self, id: &CmHandleId) {
        for cache in &self.in_flight_markers {
            cache.remove(id.as_str()).await;
        }
    }
}
