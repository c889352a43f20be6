//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Priority used when a submission does not specify one.
pub const DEFAULT_PRIORITY: u32 = 5;

/// Consecutive auth failures that trip the breaker.
pub const AUTH_FAILURE_THRESHOLD: u32 = 3;

/// What happens to new submissions while the auth breaker is tripped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitOpenPolicy {
    /// Fail the submission immediately with `SchedulerError::CircuitOpen`.
    #[default]
    Reject,
    /// Queue the submission and hold it until the breaker is cleared.
    Suspend,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Max work items executing at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Minimum spacing between two dispatches, in milliseconds
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Retry budget for submissions that don't set their own
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Priority for submissions that don't set their own (lower runs first)
    #[serde(default = "default_priority")]
    pub default_priority: u32,

    /// First backoff window after a throttled attempt, in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on any backoff window, in milliseconds
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Behaviour for new submissions while the auth breaker is tripped
    #[serde(default)]
    pub on_circuit_open: CircuitOpenPolicy,
}

fn default_max_concurrent() -> usize {
    5
}

fn default_min_delay_ms() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_priority() -> u32 {
    DEFAULT_PRIORITY
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    10_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            min_delay_ms: default_min_delay_ms(),
            max_retries: default_max_retries(),
            default_priority: default_priority(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            on_circuit_open: CircuitOpenPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    /// Get the minimum dispatch spacing as a Duration
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    /// Set the concurrency cap.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Set the minimum dispatch spacing.
    pub fn with_min_delay_ms(mut self, min_delay_ms: u64) -> Self {
        self.min_delay_ms = min_delay_ms;
        self
    }

    /// Set the default retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff window bounds.
    pub fn with_backoff(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_max_ms = max_ms;
        self
    }

    /// Set the circuit-open submission policy.
    pub fn with_circuit_open_policy(mut self, policy: CircuitOpenPolicy) -> Self {
        self.on_circuit_open = policy;
        self
    }

    /// Check the limits make sense before a scheduler is built from them.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be at least 1".to_string());
        }
        if self.max_retries == 0 {
            return Err("max_retries must be at least 1".to_string());
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(format!(
                "backoff_base_ms ({}) exceeds backoff_max_ms ({})",
                self.backoff_base_ms, self.backoff_max_ms
            ));
        }
        Ok(())
    }
}
