//! Error types for the sync core.

use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors surfaced by the sync engine and its durable store.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The durable store could not be read or written. Fatal for enqueue:
    /// the action is rejected loudly rather than silently dropped.
    #[error("Durable store unavailable: {0}")]
    StorageUnavailable(String),

    /// A single persisted record could not be decoded. The loader skips the
    /// record and continues; it never aborts the whole load.
    #[error("Corrupt queue record '{id}': {reason}")]
    CorruptRecord { id: String, reason: String },

    /// An active operation with the same idempotency key is already queued.
    #[error("Operation already queued as '{existing_id}'")]
    DuplicateOperation { existing_id: String },

    /// The façade was asked for a manager before `configure` was called.
    #[error("Sync manager is not configured")]
    NotConfigured,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Create a storage-unavailable error.
    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::StorageUnavailable(message.into())
    }

    /// Create a corrupt-record error for one stored operation.
    pub fn corrupt_record(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
