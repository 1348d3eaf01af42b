//! Offline-tolerant action sync core for the ClipStream client.
//!
//! User mutations (votes, favorites, comments, clip submissions) are queued
//! durably before any network confirmation and drained against the remote
//! service with retry/backoff. The engine here owns every status transition;
//! storage and transport are behind the [`QueueStore`] and [`NetworkExecutor`]
//! seams so the UI layer never touches either directly.

pub mod backoff;
pub mod codec;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod hub;
pub mod operation;
pub mod store;

pub use backoff::{backoff_delay_ms, backoff_with_jitter};
pub use engine::{SyncEngine, SyncEngineConfig};
pub use errors::{Result, SyncError};
pub use executor::{NetworkExecutor, Outcome};
pub use hub::{Subscription, SubscriptionHub};
pub use operation::{
    CommentPayload, FavoritePayload, Operation, OperationKind, OperationStatus, SubmitClipPayload,
    SyncPhase, SyncState, VotePayload,
};
pub use store::{QueueStore, StatusPatch, SyncSummary};
