use thiserror::Error;

use crate::dao::storage::StoreError;

/// Errors that can occur in engine-level operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed identifier or out-of-range counter supplied by the caller.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Requested table or participant row is absent.
    #[error("not found: {0}")]
    NotFound(String),
    /// Attempted to create a table whose identifier is already taken.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// Engine configuration is unusable (e.g. a zero total-task count).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Backing store unreachable after exhausting retries, with no usable
    /// cache fallback.
    #[error("backing store unavailable")]
    Unavailable(#[source] StoreError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidArgument { message } => EngineError::InvalidArgument(message),
            StoreError::NotFound { what } => EngineError::NotFound(what),
            StoreError::AlreadyExists { what } => EngineError::AlreadyExists(what),
            StoreError::Unavailable { .. } => EngineError::Unavailable(err),
        }
    }
}
