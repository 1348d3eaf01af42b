//! SQLite-backed durable queue store for the ClipStream sync engine.
//!
//! Implements the `QueueStore` contract from `clipstream-core` on top of
//! diesel + SQLite. Every mutation runs inside a `BEGIN IMMEDIATE`
//! transaction (the store-level lock the contract requires against other
//! tabs/processes sharing the file) and the connection is configured for
//! synchronous durability, so a returned write survives an immediate crash.

pub mod db;
pub mod errors;
pub mod queue;
pub mod schema;

pub use db::{open_file_pool, open_in_memory_pool, DbPool};
pub use errors::StorageError;
pub use queue::SqliteQueueStore;
