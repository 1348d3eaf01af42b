//! REST client for the ClipStream engagement API.

use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use std::time::Duration;

use clipstream_core::{CommentPayload, FavoritePayload, SubmitClipPayload, VotePayload};

use crate::error::{RemoteError, Result};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

/// Header carrying the operation's idempotency key so a redelivered
/// request that already landed server-side is a no-op there.
const IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";

/// Supplies the bearer token attached to outgoing requests.
///
/// The sync engine does not manage sessions; the host application owns
/// token refresh and hands the current token over through this trait.
pub trait AccessTokenProvider: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

/// Fixed-token provider, mostly useful for tests and scripts.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl AccessTokenProvider for StaticTokenProvider {
    fn access_token(&self) -> Option<String> {
        Some(self.token.clone())
    }
}

/// Error body shape returned by the engagement API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    code: String,
    message: String,
}

/// Client for the ClipStream engagement REST API.
#[derive(Debug, Clone)]
pub struct EngagementApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl EngagementApiClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the API (e.g., "https://api.clipstream.app")
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[ClipSync] API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[ClipSync] API response error ({}): {}", status, preview);
    }

    /// Create headers for an API request.
    fn headers(&self, token: &str, idempotency_key: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| RemoteError::auth("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        let key_value = HeaderValue::from_str(idempotency_key)
            .map_err(|_| RemoteError::invalid_request("Invalid idempotency key format"))?;
        headers.insert(IDEMPOTENCY_KEY_HEADER, key_value);

        Ok(headers)
    }

    /// Parse a JSON response body.
    async fn parse_response(response: reqwest::Response) -> Result<serde_json::Value> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                let message = if error.code.is_empty() {
                    error.message
                } else {
                    format!("{}: {}", error.code, error.message)
                };
                return Err(RemoteError::api(status.as_u16(), message));
            }
            return Err(RemoteError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }

        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        // The request succeeded; an undecodable body must not fail the
        // operation. Hand back the raw text instead.
        match serde_json::from_str(&body) {
            Ok(value) => Ok(value),
            Err(e) => {
                debug!("[ClipSync] Non-JSON success body kept as raw text: {}", e);
                Ok(serde_json::Value::String(body))
            }
        }
    }

    fn clip_url(&self, clip_id: &str, suffix: &str) -> String {
        format!(
            "{}/api/v1/clips/{}/{}",
            self.base_url,
            urlencoding::encode(clip_id),
            suffix
        )
    }

    /// Cast or change a vote on a clip.
    ///
    /// POST /api/v1/clips/{clipId}/vote
    pub async fn vote(
        &self,
        token: &str,
        idempotency_key: &str,
        payload: &VotePayload,
    ) -> Result<serde_json::Value> {
        let url = self.clip_url(&payload.clip_id, "vote");

        let response = self
            .client
            .post(&url)
            .headers(self.headers(token, idempotency_key)?)
            .json(&serde_json::json!({ "vote": payload.vote }))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Mark a clip as a favorite.
    ///
    /// POST /api/v1/clips/{clipId}/favorite
    pub async fn favorite(
        &self,
        token: &str,
        idempotency_key: &str,
        payload: &FavoritePayload,
    ) -> Result<serde_json::Value> {
        let url = self.clip_url(&payload.clip_id, "favorite");

        let response = self
            .client
            .post(&url)
            .headers(self.headers(token, idempotency_key)?)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Remove a clip from favorites.
    ///
    /// DELETE /api/v1/clips/{clipId}/favorite
    pub async fn unfavorite(
        &self,
        token: &str,
        idempotency_key: &str,
        payload: &FavoritePayload,
    ) -> Result<serde_json::Value> {
        let url = self.clip_url(&payload.clip_id, "favorite");

        let response = self
            .client
            .delete(&url)
            .headers(self.headers(token, idempotency_key)?)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Post a comment (optionally a reply) on a clip.
    ///
    /// POST /api/v1/clips/{clipId}/comments
    pub async fn comment(
        &self,
        token: &str,
        idempotency_key: &str,
        payload: &CommentPayload,
    ) -> Result<serde_json::Value> {
        let url = self.clip_url(&payload.clip_id, "comments");

        let mut body = serde_json::json!({ "content": payload.content });
        if let Some(parent_id) = &payload.parent_id {
            body["parent_id"] = serde_json::json!(parent_id);
        }

        let response = self
            .client
            .post(&url)
            .headers(self.headers(token, idempotency_key)?)
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Submit a clip URL for ingestion.
    ///
    /// POST /api/v1/clips/request
    pub async fn submit_clip(
        &self,
        token: &str,
        idempotency_key: &str,
        payload: &SubmitClipPayload,
    ) -> Result<serde_json::Value> {
        let url = format!("{}/api/v1/clips/request", self.base_url);

        let response = self
            .client
            .post(&url)
            .headers(self.headers(token, idempotency_key)?)
            .json(&serde_json::json!({ "clip_url": payload.clip_url }))
            .send()
            .await?;

        Self::parse_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let client = EngagementApiClient::new("https://api.clipstream.app/").expect("client");
        assert_eq!(
            client.clip_url("clip-1", "vote"),
            "https://api.clipstream.app/api/v1/clips/clip-1/vote"
        );
    }

    #[test]
    fn clip_ids_are_path_encoded() {
        let client = EngagementApiClient::new("https://api.clipstream.app").expect("client");
        assert_eq!(
            client.clip_url("a/b c", "favorite"),
            "https://api.clipstream.app/api/v1/clips/a%2Fb%20c/favorite"
        );
    }

    #[test]
    fn static_provider_returns_its_token() {
        let provider = StaticTokenProvider::new("tok-123");
        assert_eq!(provider.access_token().as_deref(), Some("tok-123"));
    }
}
