//! Database models for the sync queue tables.

use clipstream_core::codec::QueueRecord;
use diesel::prelude::*;

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
)]
#[diesel(table_name = crate::schema::sync_queue)]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct QueueRowDB {
    pub id: String,
    pub kind: String,
    pub payload: String,
    pub idempotency_key: String,
    pub created_at: String,
    pub attempt_count: i32,
    pub next_attempt_at: Option<String>,
    pub status: String,
    pub last_error: Option<String>,
    pub updated_at: String,
}

impl QueueRowDB {
    pub fn from_record(record: &QueueRecord, updated_at: String) -> Self {
        Self {
            id: record.id.clone(),
            kind: record.kind.clone(),
            payload: record.payload.clone(),
            idempotency_key: record.idempotency_key.clone(),
            created_at: record.created_at.clone(),
            attempt_count: record.attempt_count,
            next_attempt_at: record.next_attempt_at.clone(),
            status: record.status.clone(),
            last_error: record.last_error.clone(),
            updated_at,
        }
    }

    pub fn into_record(self) -> QueueRecord {
        QueueRecord {
            id: self.id,
            kind: self.kind,
            payload: self.payload,
            idempotency_key: self.idempotency_key,
            created_at: self.created_at,
            attempt_count: self.attempt_count,
            next_attempt_at: self.next_attempt_at,
            status: self.status,
            last_error: self.last_error,
        }
    }
}

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
)]
#[diesel(table_name = crate::schema::sync_summary)]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncSummaryDB {
    pub id: i32,
    pub phase: String,
    pub last_synced_at: Option<String>,
    pub updated_at: String,
}
