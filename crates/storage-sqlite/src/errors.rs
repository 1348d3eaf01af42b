//! Storage error mapping.

use clipstream_core::SyncError;
use thiserror::Error;

/// Low-level storage failures, converted to the core taxonomy at the
/// `QueueStore` boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("Migration error: {0}")]
    Migration(String),
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        SyncError::storage_unavailable(err.to_string())
    }
}
