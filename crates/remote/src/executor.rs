//! Bridges the engagement API client into the sync engine's executor seam.

use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

use clipstream_core::{
    CommentPayload, FavoritePayload, NetworkExecutor, Operation, OperationKind, Outcome,
    SubmitClipPayload, VotePayload,
};

use crate::client::{AccessTokenProvider, EngagementApiClient};
use crate::error::{RemoteError, RetryClass};

/// Delivers queued operations over HTTP and classifies every result.
///
/// Delivery is infallible at the type level: anything that goes wrong is
/// folded into a retryable or permanent failure outcome so the engine's
/// retry policy stays in one place.
pub struct HttpNetworkExecutor {
    client: EngagementApiClient,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl HttpNetworkExecutor {
    pub fn new(client: EngagementApiClient, tokens: Arc<dyn AccessTokenProvider>) -> Self {
        Self { client, tokens }
    }

    fn classify(err: RemoteError) -> Outcome {
        match err.retry_class() {
            RetryClass::Retryable => Outcome::retryable(err.to_string()),
            RetryClass::Permanent => Outcome::permanent(err.to_string()),
        }
    }

    fn payload<T: serde::de::DeserializeOwned>(op: &Operation) -> Result<T, Outcome> {
        serde_json::from_value(op.payload.clone()).map_err(|e| {
            Outcome::permanent(format!("Malformed {:?} payload: {}", op.kind, e))
        })
    }

    async fn deliver(&self, token: &str, op: &Operation) -> Result<serde_json::Value, Outcome> {
        let key = op.idempotency_key.as_str();
        let result = match op.kind {
            OperationKind::Vote => {
                let payload: VotePayload = Self::payload(op)?;
                self.client.vote(token, key, &payload).await
            }
            OperationKind::Favorite => {
                let payload: FavoritePayload = Self::payload(op)?;
                self.client.favorite(token, key, &payload).await
            }
            OperationKind::Unfavorite => {
                let payload: FavoritePayload = Self::payload(op)?;
                self.client.unfavorite(token, key, &payload).await
            }
            OperationKind::Comment => {
                let payload: CommentPayload = Self::payload(op)?;
                self.client.comment(token, key, &payload).await
            }
            OperationKind::SubmitClip => {
                let payload: SubmitClipPayload = Self::payload(op)?;
                self.client.submit_clip(token, key, &payload).await
            }
            OperationKind::Unknown => {
                return Err(Outcome::permanent("Unknown operation kind"));
            }
        };

        result.map_err(Self::classify)
    }
}

#[async_trait]
impl NetworkExecutor for HttpNetworkExecutor {
    async fn execute(&self, op: &Operation) -> Outcome {
        // No token means nobody is signed in right now. The action stays
        // queued and retries once a session exists.
        let Some(token) = self.tokens.access_token() else {
            debug!("[ClipSync] No access token available, deferring {}", op.id);
            return Outcome::retryable("No access token available");
        };

        match self.deliver(&token, op).await {
            Ok(body) => Outcome::Success(body),
            Err(outcome) => outcome,
        }
    }
}
