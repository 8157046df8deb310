//! Core type definitions for the NCMP inventory.
//!
//! This crate defines the plain data types shared by the storage layer and
//! the sync core:
//! - CM handle identifiers and records
//! - The composite lifecycle state (state, lock reason, datastore sync state)
//! - Plugin registration requests and per-handle responses
//! - Subscription responses and consolidated outcome events
//! - Lifecycle (LCM) notifications
//!
//! Nothing here performs I/O.

mod event;
mod handle;
mod ids;
mod registration;
mod state;
mod subscription;

pub use event::{EventId, LcmEvent};
pub use handle::{CmHandle, DmiPluginRefs, ModuleReference};
pub use ids::{CmHandleId, InvalidCmHandleId, SubscriptionKey};
pub use registration::{
    CmHandleRegistrationResponse, DmiPluginRegistration, DmiPluginRegistrationResponse,
    NcmpServiceCmHandle, RegistrationError, RegistrationStatus,
};
pub use state::{
    CmHandleState, CompositeState, DataStoreSyncState, DataStores, LockReason,
    LockReasonCategory, OperationalDataStore,
};
pub use subscription::{
    CmHandleSubscriptionStatus, SubscriptionEventResponse, SubscriptionOutcome,
    SubscriptionOutcomeEvent, SubscriptionStatus, SUBSCRIPTION_CREATED_STATUS,
};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidCmHandleId(#[from] InvalidCmHandleId),
}
