//! Request transport port (REST API).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::credentials::Token;

/// Request transport error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpError {
    /// A request was made before `connect` or after `close`.
    #[error("request transport is not connected")]
    NotConnected,

    /// The request could not be sent or the response could not be read.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete within its timeout.
    #[error("request timed out after {timeout:?}")]
    Timeout {
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The API rejected the token (401/403).
    #[error("unauthorized (status {status})")]
    Unauthorized {
        /// HTTP status code.
        status: u16,
    },

    /// The API asked the client to slow down (429).
    #[error("rate limited, retry after {retry_after_secs:?}s")]
    RateLimited {
        /// `Retry-After` in seconds, when the API sent one.
        retry_after_secs: Option<u64>,
    },

    /// The API returned an error response.
    #[error("API error {status}: {code} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error code from the response body.
        code: String,
        /// Error message from the response body.
        message: String,
    },

    /// The response body is not valid JSON.
    #[error("JSON parsing error: {0}")]
    JsonParse(String),

    /// Retryable failures persisted past the retry budget.
    #[error("max retries exceeded after {attempts} attempts")]
    MaxRetriesExceeded {
        /// Number of attempts made before giving up.
        attempts: u32,
    },
}

impl HttpError {
    /// Whether the error means the token was rejected.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Whether the error is a 404 from the API.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

/// Port for the Hiven REST API.
///
/// `connect` validates the token by fetching the current user and keeps
/// the token for subsequent requests. Every request takes an optional
/// per-call timeout that overrides the transport default.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RequestTransport: Send + Sync {
    /// Validate `token` against `/users/@me` and return the identity.
    async fn connect(&self, token: &Token) -> Result<Value, HttpError>;

    /// Drop the stored token. Subsequent requests fail with
    /// [`HttpError::NotConnected`].
    async fn close(&self);

    /// Whether `connect` succeeded and `close` has not been called.
    fn is_connected(&self) -> bool;

    /// `GET endpoint`.
    async fn request(&self, endpoint: &str, timeout: Option<Duration>)
    -> Result<Value, HttpError>;

    /// `POST endpoint` with an optional JSON body.
    async fn post(
        &self,
        endpoint: &str,
        body: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, HttpError>;

    /// `PATCH endpoint` with an optional JSON body.
    async fn patch(
        &self,
        endpoint: &str,
        body: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, HttpError>;

    /// `DELETE endpoint`.
    async fn delete(&self, endpoint: &str, timeout: Option<Duration>) -> Result<Value, HttpError>;
}
