//! CM handle inventory storage for NCMP.
//!
//! The sync core only talks to the traits defined here; the bundled
//! [`SqliteHandleStore`] implements all of them on a single SQLite
//! connection.
//!
//! # Architecture
//!
//! - Handles are stored as JSON blobs with the columns the core queries on
//!   (state, operational sync state, lock reason category) extracted
//! - Operational data and module references are kept per handle and removed
//!   together with it
//! - Subscription statuses are recorded per (client, subscription, handle)

mod error;
mod sqlite;

pub use error::{StorageError, StorageResult};
pub use sqlite::SqliteHandleStore;

use ncmp_types::{
    CmHandle, CmHandleId, CmHandleState, CmHandleSubscriptionStatus, CompositeState,
    DataStoreSyncState, LockReasonCategory, ModuleReference, SubscriptionEventResponse,
};

/// Durable store of CM handle records.
///
/// Every method is atomic on its own. `delete_batch` is all-or-nothing;
/// `insert_batch` stores what it can and reports duplicates.
pub trait HandleStore: Send + Sync {
    /// Loads one handle. Fails with [`StorageError::NotFound`] if absent.
    fn get_by_id(&self, id: &CmHandleId) -> StorageResult<CmHandle>;

    /// Loads the handles that exist among `ids`; missing ids are skipped.
    fn get_by_ids(&self, ids: &[CmHandleId]) -> StorageResult<Vec<CmHandle>>;

    fn get_by_state(&self, state: CmHandleState) -> StorageResult<Vec<CmHandle>>;

    fn get_by_operational_sync_state(
        &self,
        sync_state: DataStoreSyncState,
    ) -> StorageResult<Vec<CmHandle>>;

    /// Locked handles whose lock reason has the given category.
    fn get_by_lock_reason_category(
        &self,
        category: LockReasonCategory,
    ) -> StorageResult<Vec<CmHandle>>;

    /// Loads only the composite state of a handle.
    fn get_state(&self, id: &CmHandleId) -> StorageResult<CompositeState> {
        Ok(self.get_by_id(id)?.composite_state)
    }

    /// Whether a handle with `id` is currently in `state`.
    fn is_in_state(&self, id: &CmHandleId, state: CmHandleState) -> StorageResult<bool> {
        match self.get_state(id) {
            Ok(composite) => Ok(composite.cm_handle_state == state),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Inserts new handles. Ids that already exist are left untouched and
    /// reported through [`StorageError::AlreadyExists`].
    fn insert_batch(&self, handles: &[CmHandle]) -> StorageResult<()>;

    /// Overwrites an existing handle record.
    fn save(&self, handle: &CmHandle) -> StorageResult<()>;

    /// Overwrites the composite state of an existing handle.
    fn save_state(&self, id: &CmHandleId, state: &CompositeState) -> StorageResult<()>;

    /// Overwrites the composite state only if the handle is still in
    /// `expected`. Returns whether the state was written.
    fn save_state_if(
        &self,
        id: &CmHandleId,
        expected: CmHandleState,
        state: &CompositeState,
    ) -> StorageResult<bool>;

    /// Deletes all `ids` or none of them.
    fn delete_batch(&self, ids: &[CmHandleId]) -> StorageResult<()>;

    /// Deletes one handle, failing with [`StorageError::NotFound`] or
    /// [`StorageError::InvalidId`].
    fn delete_one(&self, id: &CmHandleId) -> StorageResult<()>;

    /// Number of handles per lifecycle state.
    fn count_by_state(&self) -> StorageResult<Vec<(CmHandleState, usize)>>;
}

/// Operational data and model information synced from devices.
pub trait OperationalDataRepository: Send + Sync {
    /// Replaces the operational data root of a handle.
    fn save_data(&self, id: &CmHandleId, data: &serde_json::Value) -> StorageResult<()>;

    fn get_data(&self, id: &CmHandleId) -> StorageResult<Option<serde_json::Value>>;

    /// Removes the operational data of a handle. Absent data is not an error.
    fn delete_data(&self, id: &CmHandleId) -> StorageResult<()>;

    fn save_module_references(
        &self,
        id: &CmHandleId,
        modules: &[ModuleReference],
    ) -> StorageResult<()>;

    fn get_module_references(&self, id: &CmHandleId) -> StorageResult<Vec<ModuleReference>>;
}

/// Durable record of per-device subscription statuses.
pub trait SubscriptionPersistence: Send + Sync {
    /// Records the statuses carried by one plugin response, replacing
    /// earlier statuses for the same devices.
    fn save_response(&self, response: &SubscriptionEventResponse) -> StorageResult<()>;

    fn cm_handle_statuses(
        &self,
        client_id: &str,
        subscription_name: &str,
    ) -> StorageResult<Vec<CmHandleSubscriptionStatus>>;
}
