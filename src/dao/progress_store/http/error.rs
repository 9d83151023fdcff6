//! Error types shared by the HTTP store implementation.

use reqwest::StatusCode;
use thiserror::Error;

use crate::dao::storage::StoreError;

/// Convenient result alias returning [`HttpStoreError`] failures.
pub type HttpResult<T> = Result<T, HttpStoreError>;

/// Failures that can occur while talking to the remote table service.
#[derive(Debug, Error)]
pub enum HttpStoreError {
    /// Required environment variable is missing.
    #[error("missing table service environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build table service client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// A request could not be sent (connection refused, timeout, DNS).
    #[error("failed to send request to `{path}`")]
    RequestSend {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// The service answered with a retryable status (5xx, 408, 429).
    #[error("transient service failure {status} for `{path}`")]
    TransientStatus { path: String, status: StatusCode },
    /// The service rejected the request as malformed.
    #[error("invalid request for `{path}`: {message}")]
    InvalidArgument { path: String, message: String },
    /// The requested table or participant row does not exist.
    #[error("resource not found: `{path}`")]
    NotFound { path: String },
    /// A resource with the same identifier already exists.
    #[error("resource already exists: `{path}`")]
    AlreadyExists { path: String },
    /// The service answered with a status this client does not understand.
    #[error("unexpected response status {status} for `{path}`")]
    UnexpectedStatus { path: String, status: StatusCode },
    /// Response payload could not be parsed into the expected JSON shape.
    #[error("failed to decode response for `{path}`")]
    DecodeResponse {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// A request body could not be serialized to JSON.
    #[error("failed to serialize request body for `{path}`")]
    SerializeBody {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// A returned timestamp could not be parsed as RFC 3339.
    #[error("invalid timestamp in response for `{path}`")]
    InvalidTimestamp {
        path: String,
        #[source]
        source: time::error::Parse,
    },
}

impl HttpStoreError {
    /// Whether retrying the request may succeed.
    ///
    /// Client errors (4xx-equivalent) and decode failures are final;
    /// transport failures and 5xx-equivalent statuses are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HttpStoreError::RequestSend { .. } | HttpStoreError::TransientStatus { .. }
        )
    }
}

impl From<HttpStoreError> for StoreError {
    fn from(err: HttpStoreError) -> Self {
        match err {
            HttpStoreError::InvalidArgument { message, .. } => {
                StoreError::InvalidArgument { message }
            }
            HttpStoreError::NotFound { path } => StoreError::NotFound { what: path },
            HttpStoreError::AlreadyExists { path } => StoreError::AlreadyExists { what: path },
            other => {
                let message = other.to_string();
                StoreError::Unavailable {
                    message,
                    source: Box::new(other),
                }
            }
        }
    }
}
