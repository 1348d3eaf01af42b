//! `QueueStore` implementation over the `sync_queue` / `sync_summary` tables.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use log::warn;

use clipstream_core::codec;
use clipstream_core::{
    Operation, OperationStatus, QueueStore, Result, StatusPatch, SyncError, SyncPhase, SyncSummary,
};

use crate::db::{get_connection, open_file_pool, open_in_memory_pool, DbPool};
use crate::errors::StorageError;
use crate::schema::{sync_queue, sync_summary};

use super::model::{QueueRowDB, SyncSummaryDB};

const ACTIVE_STATUSES: [&str; 2] = ["pending", "in_flight"];
const SUMMARY_ROW_ID: i32 = 1;

fn enum_to_db<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.trim_matches('"').to_string())
}

fn enum_from_db<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    Ok(serde_json::from_str(&format!("\"{}\"", value))?)
}

/// Durable queue store on SQLite.
pub struct SqliteQueueStore {
    pool: DbPool,
}

impl SqliteQueueStore {
    /// Open (creating and migrating if needed) the queue database at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let pool = open_file_pool(path).map_err(SyncError::from)?;
        Ok(Self { pool })
    }

    /// In-memory store, used by tests.
    pub fn in_memory() -> Result<Self> {
        let pool = open_in_memory_pool().map_err(SyncError::from)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: DbPool) -> Self {
        Self { pool }
    }

    fn find_active_id_for_key(&self, idempotency_key: &str) -> Result<Option<String>> {
        let mut conn = get_connection(&self.pool).map_err(SyncError::from)?;
        let existing = sync_queue::table
            .filter(sync_queue::idempotency_key.eq(idempotency_key))
            .filter(sync_queue::status.eq_any(ACTIVE_STATUSES))
            .select(sync_queue::id)
            .first::<String>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(existing)
    }
}

impl QueueStore for SqliteQueueStore {
    fn append(&self, op: &Operation) -> Result<()> {
        let record = codec::encode(op)?;
        let row = QueueRowDB::from_record(&record, Utc::now().to_rfc3339());

        let mut conn = get_connection(&self.pool).map_err(SyncError::from)?;
        let inserted = conn.immediate_transaction::<_, StorageError, _>(|conn| {
            diesel::insert_into(sync_queue::table)
                .values(&row)
                .execute(conn)?;
            Ok(())
        });

        match inserted {
            Ok(()) => Ok(()),
            Err(StorageError::Database(diesel::result::Error::DatabaseError(
                DatabaseErrorKind::UniqueViolation,
                _,
            ))) => match self.find_active_id_for_key(&record.idempotency_key)? {
                Some(existing_id) => Err(SyncError::DuplicateOperation { existing_id }),
                None => Err(SyncError::storage_unavailable(
                    "append conflicted with a row that is no longer active",
                )),
            },
            Err(err) => Err(err.into()),
        }
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let mut conn = get_connection(&self.pool).map_err(SyncError::from)?;
        let deleted = conn.immediate_transaction::<_, StorageError, _>(|conn| {
            Ok(diesel::delete(sync_queue::table.find(id)).execute(conn)?)
        })?;
        Ok(deleted > 0)
    }

    fn update_status(&self, id: &str, status: OperationStatus, patch: StatusPatch) -> Result<bool> {
        let status_db = enum_to_db(&status)?;
        let mut conn = get_connection(&self.pool).map_err(SyncError::from)?;

        // Read-modify-write under the immediate transaction's write lock:
        // another process interleaving between the read and the write would
        // otherwise clobber this patch.
        let updated = conn.immediate_transaction::<_, StorageError, _>(|conn| {
            let row = sync_queue::table
                .find(id)
                .first::<QueueRowDB>(conn)
                .optional()?;
            let Some(mut row) = row else {
                return Ok(false);
            };

            row.status = status_db;
            if let Some(attempts) = patch.attempt_count {
                row.attempt_count = attempts;
            }
            if let Some(next_attempt_at) = patch.next_attempt_at {
                row.next_attempt_at = next_attempt_at.map(|at| at.to_rfc3339());
            }
            if let Some(last_error) = patch.last_error {
                row.last_error = last_error;
            }
            row.updated_at = Utc::now().to_rfc3339();

            diesel::update(sync_queue::table.find(id))
                .set(&row)
                .execute(conn)?;
            Ok(true)
        })?;
        Ok(updated)
    }

    fn load_all(&self) -> Result<Vec<Operation>> {
        let mut conn = get_connection(&self.pool).map_err(SyncError::from)?;
        let rows = sync_queue::table
            .order((sync_queue::created_at.asc(), sync_queue::id.asc()))
            .load::<QueueRowDB>(&mut conn)
            .map_err(StorageError::from)?;

        let mut ops = Vec::with_capacity(rows.len());
        for row in rows {
            match codec::decode(&row.into_record()) {
                Ok(op) => ops.push(op),
                // One unreadable record must not take the rest of the queue
                // down with it.
                Err(err) => warn!("[ClipSync] Skipping unreadable queue record: {}", err),
            }
        }
        Ok(ops)
    }

    fn load_summary(&self) -> Result<Option<SyncSummary>> {
        let mut conn = get_connection(&self.pool).map_err(SyncError::from)?;
        let row = sync_summary::table
            .find(SUMMARY_ROW_ID)
            .first::<SyncSummaryDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let Ok(phase) = enum_from_db::<SyncPhase>(&row.phase) else {
            warn!(
                "[ClipSync] Summary row holds unknown phase '{}'; rebuilding from operations",
                row.phase
            );
            return Ok(None);
        };
        let last_synced_at = row
            .last_synced_at
            .as_deref()
            .and_then(|at| DateTime::parse_from_rfc3339(at).ok())
            .map(|at| at.with_timezone(&Utc));
        Ok(Some(SyncSummary {
            phase,
            last_synced_at,
        }))
    }

    fn save_summary(&self, summary: &SyncSummary) -> Result<()> {
        let row = SyncSummaryDB {
            id: SUMMARY_ROW_ID,
            phase: enum_to_db(&summary.phase)?,
            last_synced_at: summary.last_synced_at.map(|at| at.to_rfc3339()),
            updated_at: Utc::now().to_rfc3339(),
        };

        let mut conn = get_connection(&self.pool).map_err(SyncError::from)?;
        conn.immediate_transaction::<_, StorageError, _>(|conn| {
            diesel::insert_into(sync_summary::table)
                .values(&row)
                .on_conflict(sync_summary::id)
                .do_update()
                .set(&row)
                .execute(conn)?;
            Ok(())
        })?;
        Ok(())
    }
}
