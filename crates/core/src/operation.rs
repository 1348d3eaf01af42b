//! Queued-operation domain models and the observable sync state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// User-initiated mutation kinds the queue can carry.
///
/// `Unknown` is never enqueued locally; it is what a record written by a
/// newer client version decodes to, so an older reader keeps the record
/// visible instead of crashing on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Vote,
    Favorite,
    Unfavorite,
    Comment,
    SubmitClip,
    #[serde(other)]
    Unknown,
}

/// Lifecycle status of one queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InFlight,
    Succeeded,
    FailedRetryable,
    FailedPermanent,
}

impl OperationStatus {
    /// Terminal statuses are never retried by the engine.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedPermanent)
    }
}

/// One durably-queued user action awaiting server confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    pub kind: OperationKind,
    pub payload: serde_json::Value,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub attempt_count: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub status: OperationStatus,
    pub last_error: Option<String>,
}

impl Operation {
    /// Build a fresh pending operation for `kind` with a kind-specific payload.
    ///
    /// Ids are time-ordered (UUIDv7) so insertion order survives equal-millisecond
    /// timestamps. The idempotency key is derived from kind + payload + creation
    /// time, so replaying the same request after an ambiguous network failure is
    /// a server-side no-op while a genuinely new identical action (later tap)
    /// still gets its own key.
    pub fn new(kind: OperationKind, payload: serde_json::Value) -> Self {
        let created_at = Utc::now();
        let idempotency_key = derive_idempotency_key(kind, &payload, created_at);
        Self {
            id: Uuid::now_v7().to_string(),
            kind,
            payload,
            idempotency_key,
            created_at,
            attempt_count: 0,
            next_attempt_at: None,
            status: OperationStatus::Pending,
            last_error: None,
        }
    }

    /// Key identifying the ordered group this operation belongs to.
    ///
    /// Operations on the same clip must execute in submission order (a
    /// favorite then unfavorite on one clip cannot be reordered); operations
    /// on different targets are independent. `None` means no dependency.
    pub fn ordering_key(&self) -> Option<String> {
        let field = match self.kind {
            OperationKind::Vote
            | OperationKind::Favorite
            | OperationKind::Unfavorite
            | OperationKind::Comment => "clip_id",
            OperationKind::SubmitClip => "clip_url",
            OperationKind::Unknown => return None,
        };
        self.payload
            .get(field)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

/// Derive the idempotency key sent with every remote delivery of this action.
pub fn derive_idempotency_key(
    kind: OperationKind,
    payload: &serde_json::Value,
    created_at: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_string(&kind).unwrap_or_default());
    hasher.update(payload.to_string());
    hasher.update(created_at.timestamp_millis().to_le_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

/// Observable engine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Syncing,
    Error,
}

/// Process-wide snapshot exposed to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub phase: SyncPhase,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub pending_count: usize,
    pub last_error: Option<String>,
}

/// Payload for `vote`: `vote` is `1` (up) or `-1` (down).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotePayload {
    pub clip_id: String,
    pub vote: i16,
}

/// Payload for `favorite` / `unfavorite`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoritePayload {
    pub clip_id: String,
}

/// Payload for `comment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentPayload {
    pub clip_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// Payload for `submit_clip`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitClipPayload {
    pub clip_url: String,
}
