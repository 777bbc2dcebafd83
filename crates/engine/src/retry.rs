//! Retry policy for failed step attempts.
//!
//! The budget is per step: `max_attempts` counts the first attempt, and a
//! new step starts with a fresh budget. Backoff is exponential from
//! `base_delay_ms`, capped at `max_delay_ms`, plus optional random jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::definition::RetryOverride;
use crate::error::StepError;

/// Retry decision for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub backoff: Duration,
}

impl RetryDecision {
    fn stop() -> Self {
        Self {
            retry: false,
            backoff: Duration::ZERO,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per step, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound of random jitter added to each delay.
    #[serde(default)]
    pub jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    10000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: 0,
        }
    }
}

impl RetryPolicy {
    /// Apply a step's override.
    pub fn for_step(&self, step: Option<&RetryOverride>) -> Self {
        let mut policy = self.clone();
        if let Some(o) = step {
            if let Some(max_attempts) = o.max_attempts {
                policy.max_attempts = max_attempts.max(1);
            }
            if let Some(base_delay_ms) = o.base_delay_ms {
                policy.base_delay_ms = base_delay_ms;
            }
        }
        policy
    }

    /// Decide whether attempt number `attempt` (1-based) should be followed
    /// by another one.
    pub fn should_retry(&self, error: &StepError, attempt: u32, max_attempts: u32) -> RetryDecision {
        if !error.is_retryable() || attempt >= max_attempts {
            return RetryDecision::stop();
        }
        RetryDecision {
            retry: true,
            backoff: self.backoff(attempt),
        }
    }

    /// Delay after attempt number `attempt` (1-based) has failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let delay = (self.base_delay_ms as f64) * self.multiplier.max(1.0).powi(exponent);
        let capped = delay.min(self.max_delay_ms as f64).max(0.0) as u64;
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(capped.saturating_add(jitter))
    }
}
