//! Engine-level configuration loading.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::dao::progress_store::http::RetryPolicy;

/// Default location on disk where the engine looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/engine.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "SCORESYNC_CONFIG_PATH";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the engine.
///
/// Every tunable here is an externally supplied constant, not a policy
/// decision baked into the engine: course size, debounce quiet interval,
/// cache TTL, and retry parameters all come from deployment configuration.
pub struct EngineConfig {
    /// Total number of tasks in the course; must never be zero.
    pub total_tasks: u32,
    /// Quiet interval during which rapid local events collapse into one write.
    pub debounce_quiet: Duration,
    /// Age below which a cached leaderboard snapshot is served as-is.
    pub cache_ttl: Duration,
    /// Timeout applied to every individual store request.
    pub request_timeout: Duration,
    /// Maximum attempts for one logical store call.
    pub retry_max_attempts: u32,
    /// Delay before the first retry.
    pub retry_base_delay: Duration,
    /// Upper bound on the exponential retry delay.
    pub retry_max_delay: Duration,
    /// Wall-clock budget shared by all attempts of one logical call.
    pub retry_budget: Duration,
    /// Page size used when iterating participants and tables.
    pub page_size: usize,
    /// Optional cap on snapshot size for memory control.
    pub max_leaderboard_entries: Option<usize>,
}

impl EngineConfig {
    /// Load the engine configuration from disk, falling back to built-in
    /// defaults when the file is absent or unreadable.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        total_tasks = config.total_tasks,
                        "loaded engine configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Build the retry policy handed to the store client.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
            budget: self.retry_budget,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            total_tasks: 10,
            debounce_quiet: Duration::from_secs(2),
            cache_ttl: Duration::from_secs(45),
            request_timeout: Duration::from_secs(30),
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(10),
            retry_budget: Duration::from_secs(30),
            page_size: 100,
            max_leaderboard_entries: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
/// JSON representation of the configuration file located at
/// [`DEFAULT_CONFIG_PATH`]. Absent fields keep their defaults.
struct RawConfig {
    total_tasks: Option<u32>,
    debounce_quiet_ms: Option<u64>,
    cache_ttl_seconds: Option<u64>,
    request_timeout_seconds: Option<u64>,
    retry_max_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
    retry_budget_seconds: Option<u64>,
    page_size: Option<usize>,
    max_leaderboard_entries: Option<usize>,
}

impl From<RawConfig> for EngineConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = Self::default();
        Self {
            total_tasks: raw.total_tasks.unwrap_or(defaults.total_tasks),
            debounce_quiet: raw
                .debounce_quiet_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.debounce_quiet),
            cache_ttl: raw
                .cache_ttl_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            request_timeout: raw
                .request_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            retry_max_attempts: raw.retry_max_attempts.unwrap_or(defaults.retry_max_attempts),
            retry_base_delay: raw
                .retry_base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            retry_max_delay: raw
                .retry_max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_max_delay),
            retry_budget: raw
                .retry_budget_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_budget),
            page_size: raw.page_size.unwrap_or(defaults.page_size),
            max_leaderboard_entries: raw
                .max_leaderboard_entries
                .or(defaults.max_leaderboard_entries),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_raw_config_keeps_defaults() {
        let raw: RawConfig =
            serde_json::from_str(r#"{ "totalTasks": 20, "cacheTtlSeconds": 5 }"#).unwrap();
        let config = EngineConfig::from(raw);
        assert_eq!(config.total_tasks, 20);
        assert_eq!(config.cache_ttl, Duration::from_secs(5));
        assert_eq!(config.debounce_quiet, Duration::from_secs(2));
        assert_eq!(config.page_size, 100);
    }

    #[test]
    fn retry_policy_reflects_config() {
        let config = EngineConfig {
            retry_max_attempts: 5,
            retry_base_delay: Duration::from_millis(100),
            ..EngineConfig::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
    }
}
