//! Reusable retry policy with capped exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{Instant, sleep};
use tracing::warn;

use super::error::{HttpResult, HttpStoreError};

/// Retry parameters applied to every logical store call.
///
/// The time budget is shared across all attempts of one logical call, not
/// granted per attempt, so worst-case latency stays bounded.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts for one logical call.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled after each failure.
    pub base_delay: Duration,
    /// Upper bound applied to the exponential delay.
    pub max_delay: Duration,
    /// Wall-clock budget shared by all attempts of one logical call.
    pub budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            budget: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Run `operation` until it succeeds, fails with a non-transient error,
    /// or the attempt count or time budget is exhausted.
    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> HttpResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HttpResult<T>>,
    {
        let deadline = Instant::now() + self.budget;
        let mut delay = self.base_delay.min(self.max_delay);
        let mut attempt: u32 = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let pause = jittered(delay);
                    if Instant::now() + pause >= deadline {
                        return Err(err);
                    }
                    warn!(what, attempt, error = %err, "transient store failure; retrying");
                    sleep(pause).await;
                    delay = (delay * 2).min(self.max_delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Add up to 50% random jitter so concurrent clients do not retry in
/// lockstep.
fn jittered(delay: Duration) -> Duration {
    let half = (delay.as_millis() as u64) / 2;
    let extra = rand::rng().random_range(0..=half);
    delay + Duration::from_millis(extra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use reqwest::StatusCode;

    fn transient() -> HttpStoreError {
        HttpStoreError::TransientStatus {
            path: "/tables".into(),
            status: StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();

        let counter = calls.clone();
        let result = policy
            .run("test", move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(transient())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };

        let counter = calls.clone();
        let result: HttpResult<u32> = policy
            .run("test", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn semantic_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();

        let counter = calls.clone();
        let result: HttpResult<u32> = policy
            .run("test", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(HttpStoreError::NotFound {
                        path: "/tables/missing".into(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(HttpStoreError::NotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_bounds_total_retry_time() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
            budget: Duration::from_secs(1),
        };

        let counter = calls.clone();
        let result: HttpResult<u32> = policy
            .run("test", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                }
            })
            .await;

        // The first retry pause alone would blow the budget, so only one
        // attempt is made.
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
