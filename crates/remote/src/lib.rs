//! Remote delivery for queued ClipStream actions.
//!
//! One outbound REST call per operation kind, each carrying the operation's
//! idempotency key so a retried delivery that already landed server-side is
//! a no-op there. The executor classifies every result into the engine's
//! success / retryable / permanent outcome set.

pub mod client;
pub mod error;
pub mod executor;

pub use client::{AccessTokenProvider, EngagementApiClient, StaticTokenProvider};
pub use error::{RemoteError, Result, RetryClass};
pub use executor::HttpNetworkExecutor;
