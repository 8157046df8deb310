//! Error types for the storage layer.

use ncmp_types::CmHandleId;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Handle not found.
    #[error("cm handle not found: {0}")]
    NotFound(String),

    /// Some handles of a batch insert already existed. The remaining
    /// handles of the batch were stored.
    #[error("cm handles already exist: {0:?}")]
    AlreadyExists(Vec<CmHandleId>),

    /// The identifier cannot address a record.
    #[error("invalid cm handle id: {0}")]
    InvalidId(String),

    /// Invalid data.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The connection mutex was poisoned by a panicking writer.
    #[error("storage lock poisoned")]
    LockPoisoned,
}
