//! Tuning settings for polling, write retries and allocation
//!
//! Durations are stored in milliseconds so the YAML stays readable.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level settings document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub poll: PollSettings,
    pub retry: RetrySettings,
    pub allocator: AllocatorSettings,
}

impl Settings {
    /// Reject values that would make a loop never run or never back off
    pub fn validate(&self) -> Result<()> {
        self.poll.validate()?;
        self.retry.validate()?;
        self.allocator.validate()
    }
}

/// Defaults for state polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSettings {
    /// Sleep before the first refresh
    #[serde(default)]
    pub delay_ms: u64,
    /// Lower bound for the sleep between refreshes
    #[serde(default)]
    pub min_interval_ms: u64,
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_poll_timeout")]
    pub timeout_ms: u64,
    /// Consecutive "absent" observations tolerated while waiting for a
    /// non-deletion target
    #[serde(default = "default_not_found_checks")]
    pub not_found_checks: u32,
    /// Consecutive target observations required before success
    #[serde(default = "default_continuous_target_occurrence")]
    pub continuous_target_occurrence: u32,
}

fn default_backoff_initial() -> u64 {
    100
}
fn default_backoff_max() -> u64 {
    10_000
}
fn default_poll_timeout() -> u64 {
    20 * 60 * 1000 // 20分
}
fn default_not_found_checks() -> u32 {
    20
}
fn default_continuous_target_occurrence() -> u32 {
    1
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            delay_ms: 0,
            min_interval_ms: 0,
            backoff_initial_ms: default_backoff_initial(),
            backoff_max_ms: default_backoff_max(),
            timeout_ms: default_poll_timeout(),
            not_found_checks: default_not_found_checks(),
            continuous_target_occurrence: default_continuous_target_occurrence(),
        }
    }
}

impl PollSettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.backoff_initial_ms == 0 {
            return Err(ConfigError::invalid("poll.backoff_initial_ms", "must be > 0"));
        }
        if self.backoff_max_ms < self.backoff_initial_ms {
            return Err(ConfigError::invalid(
                "poll.backoff_max_ms",
                "must be >= poll.backoff_initial_ms",
            ));
        }
        if self.continuous_target_occurrence == 0 {
            return Err(ConfigError::invalid(
                "poll.continuous_target_occurrence",
                "must be >= 1",
            ));
        }
        Ok(())
    }
}

/// Bounds for retrying a mutating call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_initial")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_retry_max")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_retry_timeout")]
    pub timeout_ms: u64,
}

fn default_retry_attempts() -> u32 {
    5
}
fn default_retry_initial() -> u64 {
    1000
}
fn default_retry_max() -> u64 {
    30_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_retry_timeout() -> u64 {
    5 * 60 * 1000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_delay_ms: default_retry_initial(),
            max_delay_ms: default_retry_max(),
            backoff_multiplier: default_multiplier(),
            timeout_ms: default_retry_timeout(),
        }
    }
}

impl RetrySettings {
    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be >= 1"));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::invalid(
                "retry.max_delay_ms",
                "must be >= retry.initial_delay_ms",
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "retry.backoff_multiplier",
                "must be >= 1.0",
            ));
        }
        Ok(())
    }
}

/// Tuning for the optimistic allocator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatorSettings {
    #[serde(default = "default_allocator_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_jitter_min")]
    pub jitter_min_ms: u64,
    #[serde(default = "default_jitter_max")]
    pub jitter_max_ms: u64,
    /// Fixed seed for the jitter sequence
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_allocator_attempts() -> u32 {
    5
}
fn default_jitter_min() -> u64 {
    1000
}
fn default_jitter_max() -> u64 {
    5000
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_allocator_attempts(),
            jitter_min_ms: default_jitter_min(),
            jitter_max_ms: default_jitter_max(),
            seed: None,
        }
    }
}

impl AllocatorSettings {
    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("allocator.max_attempts", "must be >= 1"));
        }
        if self.jitter_max_ms < self.jitter_min_ms {
            return Err(ConfigError::invalid(
                "allocator.jitter_max_ms",
                "must be >= allocator.jitter_min_ms",
            ));
        }
        Ok(())
    }
}
