//! Network executor contract and outcome classification.

use async_trait::async_trait;

use crate::operation::Operation;

/// Classified result of delivering one operation to the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// 2xx. Carries the decoded server response body.
    Success(serde_json::Value),
    /// Transient: network-level failure, timeout, 429 or 5xx. The engine
    /// reschedules with backoff.
    RetryableFailure(String),
    /// Definitive: validation/conflict/not-found class 4xx. Never retried.
    PermanentFailure(String),
}

impl Outcome {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::RetryableFailure(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::PermanentFailure(reason.into())
    }
}

/// Performs the remote call for one operation and classifies the result.
///
/// Implementations attach the operation's idempotency key to every request
/// (a retried call that already succeeded server-side reports `Success`, not
/// a duplicate) and enforce a per-call timeout, reported as retryable.
/// `execute` is infallible by design: every failure mode is an `Outcome`, so
/// one bad operation can never throw out of the drain loop.
#[async_trait]
pub trait NetworkExecutor: Send + Sync {
    async fn execute(&self, op: &Operation) -> Outcome;
}
