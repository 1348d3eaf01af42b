//! Connection pool setup and embedded migrations.

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::errors::StorageError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Durability and contention settings applied to every pooled connection.
///
/// `synchronous = FULL` is what lets `QueueStore::append` promise the record
/// survives an immediate crash; the busy timeout covers writers in other
/// tabs/processes holding the file lock.
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(
            "PRAGMA journal_mode = WAL; \
             PRAGMA synchronous = FULL; \
             PRAGMA busy_timeout = 5000; \
             PRAGMA foreign_keys = ON;",
        )
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

fn build_pool(database_url: &str, max_size: u32) -> Result<DbPool, StorageError> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(max_size)
        .connection_customizer(Box::new(ConnectionOptions))
        .build(manager)
        .map_err(|e| StorageError::Migration(format!("Failed to build pool: {}", e)))?;

    let mut conn = pool.get()?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| StorageError::Migration(e.to_string()))?;
    Ok(pool)
}

/// Open (creating if needed) the queue database at `path`.
pub fn open_file_pool(path: &str) -> Result<DbPool, StorageError> {
    build_pool(path, 4)
}

/// In-memory database for tests. A uniquely named shared-cache database
/// lets every connection in the pool see the same data while still
/// allowing more than one connection to be held at a time.
pub fn open_in_memory_pool() -> Result<DbPool, StorageError> {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT_DB_ID: AtomicU64 = AtomicU64::new(0);
    let id = NEXT_DB_ID.fetch_add(1, Ordering::Relaxed);
    let url = format!("file:clipstream_mem_{id}?mode=memory&cache=shared");
    build_pool(&url, 4)
}

pub fn get_connection(pool: &DbPool) -> Result<DbConnection, StorageError> {
    Ok(pool.get()?)
}
