use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error raised by storage backends regardless of the underlying transport.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected a malformed identifier or field.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Human-readable rejection reason.
        message: String,
    },
    /// The requested table or participant row is absent.
    #[error("not found: {what}")]
    NotFound {
        /// Which resource was missing.
        what: String,
    },
    /// The resource already exists and cannot be created again.
    #[error("already exists: {what}")]
    AlreadyExists {
        /// Which resource collided.
        what: String,
    },
    /// The backend could not be reached within the retry budget.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Summary of the transport failure.
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StoreError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StoreError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}
