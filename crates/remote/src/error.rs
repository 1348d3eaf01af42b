//! Error types for the remote delivery crate.

use thiserror::Error;

/// Result type alias for remote operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Retry policy class for delivery failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Permanent,
}

/// Errors that can occur while delivering an operation.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP client error (connect, timeout, body)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-2xx response from the service
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The operation payload cannot be turned into a request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No usable access token was supplied by the caller
    #[error("Authentication error: {0}")]
    Auth(String),
}

fn is_retryable_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

impl RemoteError {
    /// Create an API error from status and message.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create an auth error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify for retry policy. Transport failures and 429/5xx are
    /// transient; every other 4xx (validation, not-found, conflict, auth)
    /// is definitive, as is a response body we cannot decode.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Api { status, .. } => match *status {
                429 => RetryClass::Retryable,
                500..=599 => RetryClass::Retryable,
                _ => RetryClass::Permanent,
            },
            Self::Http(err) if is_retryable_transport_error(err) => RetryClass::Retryable,
            Self::Http(_) => RetryClass::Permanent,
            Self::Json(_) => RetryClass::Permanent,
            Self::InvalidRequest(_) => RetryClass::Permanent,
            Self::Auth(_) => RetryClass::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_overload_is_retryable() {
        assert_eq!(RemoteError::api(500, "boom").retry_class(), RetryClass::Retryable);
        assert_eq!(RemoteError::api(503, "busy").retry_class(), RetryClass::Retryable);
        assert_eq!(
            RemoteError::api(429, "slow down").retry_class(),
            RetryClass::Retryable
        );
    }

    #[test]
    fn client_errors_are_permanent() {
        assert_eq!(RemoteError::api(400, "bad vote").retry_class(), RetryClass::Permanent);
        assert_eq!(RemoteError::api(404, "no clip").retry_class(), RetryClass::Permanent);
        assert_eq!(RemoteError::api(409, "conflict").retry_class(), RetryClass::Permanent);
        assert_eq!(RemoteError::api(401, "expired").retry_class(), RetryClass::Permanent);
    }

    #[test]
    fn malformed_payloads_are_permanent() {
        assert_eq!(
            RemoteError::invalid_request("missing clip_id").retry_class(),
            RetryClass::Permanent
        );
    }
}
