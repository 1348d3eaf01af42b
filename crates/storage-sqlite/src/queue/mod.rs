//! Durable operation queue tables.

mod model;
mod repository;

pub use repository::SqliteQueueStore;
