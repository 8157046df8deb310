//! Error types for the NCMP core.

use crate::dmi::DmiError;
use ncmp_storage::StorageError;
use ncmp_types::{CmHandleId, CmHandleState};
use thiserror::Error;

/// Result type for core operations.
pub type NcmpResult<T> = Result<T, NcmpError>;

/// Errors that can occur in core operations.
///
/// Batch operations report these per handle; only [`NcmpError::Validation`]
/// fails a whole request.
#[derive(Debug, Error)]
pub enum NcmpError {
    /// Malformed registration request.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("cm handle not found: {0}")]
    NotFound(CmHandleId),

    #[error("cm handle already exists: {0}")]
    AlreadyExists(CmHandleId),

    #[error("invalid cm handle id: {0}")]
    InvalidId(String),

    #[error("illegal transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: CmHandleId,
        from: CmHandleState,
        to: CmHandleState,
    },

    /// A LOCKED target was requested without a lock reason.
    #[error("no lock reason supplied for {0}")]
    MissingLockReason(CmHandleId),

    /// The operation requires a different lifecycle state.
    #[error("cm handle {id} is {state}")]
    InvalidState { id: CmHandleId, state: CmHandleState },

    /// The handle left `expected` between reading and writing its state.
    #[error("cm handle {id} changed concurrently, no longer {expected}")]
    ConcurrentModification {
        id: CmHandleId,
        expected: CmHandleState,
    },

    /// Another cluster member holds the in-flight marker.
    #[error("cm handle {0} is already being processed")]
    AlreadyProcessing(CmHandleId),

    #[error("data sync is disabled for {0}")]
    DataSyncDisabled(CmHandleId),

    /// DMI plugin failure; the handle is retried on a later cycle.
    #[error("transport error: {0}")]
    Transport(#[from] DmiError),

    #[error("storage error: {0}")]
    Storage(StorageError),

    /// A whole-batch storage operation failed for every member.
    #[error("batch failed: {0}")]
    BatchFailed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<StorageError> for NcmpError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => Self::NotFound(CmHandleId::new(id)),
            StorageError::InvalidId(id) => Self::InvalidId(id),
            other => Self::Storage(other),
        }
    }
}
