//! Durable queue store contract.
//!
//! The store is the single source of truth across reloads; the engine's
//! in-memory queue is a cache rebuilt from it. Implementations must make
//! every mutating call synchronously durable before returning, and must treat
//! read-modify-write sequences as interleavable (other processes may share
//! the same storage), so each mutation runs under a store-level lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::operation::{Operation, OperationStatus, SyncPhase};

/// Partial update applied together with a status transition.
///
/// `None` leaves the field untouched; the inner `Option` distinguishes
/// setting a value from clearing it.
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    pub attempt_count: Option<i32>,
    pub next_attempt_at: Option<Option<DateTime<Utc>>>,
    pub last_error: Option<Option<String>>,
}

/// Persisted engine summary, one row alongside the operation list.
///
/// Readers treat a missing or corrupt summary as "rebuild from operations".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub phase: SyncPhase,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Contract for the durable, append-only pending-operation store.
pub trait QueueStore: Send + Sync {
    /// Durably append a new operation. Fails with `StorageUnavailable` when
    /// the backing storage cannot be written, and `DuplicateOperation` when
    /// an active (pending/in-flight) operation already holds the same
    /// idempotency key.
    fn append(&self, op: &Operation) -> Result<()>;

    /// Remove one operation. Returns `false` when the id is already gone
    /// (e.g. cleared while its network call was still executing).
    fn remove(&self, id: &str) -> Result<bool>;

    /// Transition one operation's status, applying `patch` atomically with
    /// it. Returns `false` when the id no longer exists.
    fn update_status(&self, id: &str, status: OperationStatus, patch: StatusPatch) -> Result<bool>;

    /// Load every stored operation in insertion order. A corrupt record is
    /// skipped (and logged by the implementation), never an error for the
    /// whole load.
    fn load_all(&self) -> Result<Vec<Operation>>;

    /// Load the persisted summary, if present and readable.
    fn load_summary(&self) -> Result<Option<SyncSummary>>;

    /// Durably upsert the summary row.
    fn save_summary(&self, summary: &SyncSummary) -> Result<()>;
}
