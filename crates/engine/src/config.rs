//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// What a condition evaluating to false does to the execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionPolicy {
    /// Skip the remaining steps and complete the execution.
    #[default]
    SkipRemaining,
    /// Skip the remaining steps and fail the execution.
    FailExecution,
}

/// Engine configuration loaded from environment variables.
///
/// Environment variables are prefixed with `STEPFLOW_ENGINE_`:
/// - `STEPFLOW_ENGINE_MAX_ATTEMPTS`: Attempts per step including the first (default: 3)
/// - `STEPFLOW_ENGINE_RETRY_BASE_DELAY_MS`: First backoff delay (default: 500)
/// - `STEPFLOW_ENGINE_RETRY_MULTIPLIER`: Backoff multiplier (default: 2.0)
/// - `STEPFLOW_ENGINE_RETRY_MAX_DELAY_MS`: Backoff cap (default: 10000)
/// - `STEPFLOW_ENGINE_RETRY_JITTER_MS`: Random jitter bound (default: 0)
/// - `STEPFLOW_ENGINE_CALL_TIMEOUT_MS`: Per-call HTTP timeout (default: 30000)
/// - `STEPFLOW_ENGINE_CONDITION_POLICY`: `skip_remaining` or `fail_execution`
/// - `STEPFLOW_ENGINE_HISTORY_LIMIT`: Records returned by history queries (default: 50)
/// - `STEPFLOW_ENGINE_STORE_SHARDS`: In-memory store shard count (default: 16)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    #[serde(default)]
    pub retry_jitter_ms: u64,

    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    #[serde(default)]
    pub condition_policy: ConditionPolicy,

    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    #[serde(default = "default_store_shards")]
    pub store_shards: usize,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_retry_max_delay_ms() -> u64 {
    10000
}

fn default_call_timeout_ms() -> u64 {
    30000
}

fn default_history_limit() -> usize {
    50
}

fn default_store_shards() -> usize {
    16
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("STEPFLOW_ENGINE_").from_env::<EngineConfig>()
    }

    /// Retry policy derived from the retry settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay_ms: self.retry_base_delay_ms,
            multiplier: self.retry_multiplier,
            max_delay_ms: self.retry_max_delay_ms,
            jitter_ms: self.retry_jitter_ms,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_multiplier: default_retry_multiplier(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_jitter_ms: 0,
            call_timeout_ms: default_call_timeout_ms(),
            condition_policy: ConditionPolicy::default(),
            history_limit: default_history_limit(),
            store_shards: default_store_shards(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.condition_policy, ConditionPolicy::SkipRemaining);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.call_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_from_env_vars() {
        let vars = vec![
            ("STEPFLOW_ENGINE_MAX_ATTEMPTS".to_string(), "5".to_string()),
            ("STEPFLOW_ENGINE_CONDITION_POLICY".to_string(), "fail_execution".to_string()),
        ];
        let config: EngineConfig = envy::prefixed("STEPFLOW_ENGINE_").from_iter(vars).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.condition_policy, ConditionPolicy::FailExecution);
        assert_eq!(config.history_limit, 50);
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let config = EngineConfig {
            max_attempts: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.retry_policy().max_attempts, 1);
    }
}
