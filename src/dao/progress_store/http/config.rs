use std::time::Duration;

use super::error::{HttpResult, HttpStoreError};
use super::retry::RetryPolicy;

/// Runtime configuration describing how to reach the table service.
#[derive(Debug, Clone)]
pub struct HttpStoreConfig {
    /// Base URL of the table service, without a trailing slash.
    pub base_url: String,
    /// Timeout applied to every individual request.
    pub request_timeout: Duration,
    /// Retry policy shared by every logical call.
    pub retry: RetryPolicy,
}

impl HttpStoreConfig {
    /// Construct a configuration from an explicit base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build a configuration by reading the expected environment variable.
    pub fn from_env() -> HttpResult<Self> {
        let base_url = std::env::var("SCORESYNC_API_BASE_URL").map_err(|_| {
            HttpStoreError::MissingEnvVar {
                var: "SCORESYNC_API_BASE_URL",
            }
        })?;
        Ok(Self::new(base_url))
    }
}
