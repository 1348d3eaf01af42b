//! Codec between [`Operation`] and the durable store's record representation.
//!
//! Decoding is forward-compatible: a record written by a newer client with an
//! unknown `kind` becomes a `failed_permanent` stub instead of an error, so
//! the rest of the queue keeps loading. Any genuinely malformed field is a
//! `CorruptRecord`, which the loader skips without aborting.

use chrono::{DateTime, Utc};

use crate::errors::{Result, SyncError};
use crate::operation::{Operation, OperationKind, OperationStatus};

/// Flat store-level representation of one queued operation.
///
/// Everything is a string or integer so any backing store (SQLite here, but
/// the shape is storage-agnostic) can hold it without schema knowledge of the
/// payload kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRecord {
    pub id: String,
    pub kind: String,
    pub payload: String,
    pub idempotency_key: String,
    pub created_at: String,
    pub attempt_count: i32,
    pub next_attempt_at: Option<String>,
    pub status: String,
    pub last_error: Option<String>,
}

fn enum_to_db<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.trim_matches('"').to_string())
}

fn enum_from_db<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    Ok(serde_json::from_str(&format!("\"{}\"", value))?)
}

/// Encode an operation into its store record.
pub fn encode(op: &Operation) -> Result<QueueRecord> {
    Ok(QueueRecord {
        id: op.id.clone(),
        kind: enum_to_db(&op.kind)?,
        payload: op.payload.to_string(),
        idempotency_key: op.idempotency_key.clone(),
        created_at: op.created_at.to_rfc3339(),
        attempt_count: op.attempt_count,
        next_attempt_at: op.next_attempt_at.map(|at| at.to_rfc3339()),
        status: enum_to_db(&op.status)?,
        last_error: op.last_error.clone(),
    })
}

fn parse_timestamp(record_id: &str, field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::corrupt_record(record_id, format!("{}: {}", field, e)))
}

/// Decode one store record back into an operation.
pub fn decode(record: &QueueRecord) -> Result<Operation> {
    let payload: serde_json::Value = serde_json::from_str(&record.payload)
        .map_err(|e| SyncError::corrupt_record(&record.id, format!("payload: {}", e)))?;
    let created_at = parse_timestamp(&record.id, "created_at", &record.created_at)?;
    let next_attempt_at = record
        .next_attempt_at
        .as_deref()
        .map(|at| parse_timestamp(&record.id, "next_attempt_at", at))
        .transpose()?;
    let status: OperationStatus = enum_from_db(&record.status)
        .map_err(|_| SyncError::corrupt_record(&record.id, format!("status '{}'", record.status)))?;

    // `#[serde(other)]` maps any unrecognized kind to Unknown.
    let kind: OperationKind = enum_from_db(&record.kind)
        .map_err(|_| SyncError::corrupt_record(&record.id, format!("kind '{}'", record.kind)))?;

    let mut op = Operation {
        id: record.id.clone(),
        kind,
        payload,
        idempotency_key: record.idempotency_key.clone(),
        created_at,
        attempt_count: record.attempt_count,
        next_attempt_at,
        status,
        last_error: record.last_error.clone(),
    };

    if kind == OperationKind::Unknown && !status.is_terminal() {
        op.status = OperationStatus::FailedPermanent;
        op.last_error = Some(format!(
            "Unsupported operation kind '{}' (written by a newer client?)",
            record.kind
        ));
    }

    Ok(op)
}
