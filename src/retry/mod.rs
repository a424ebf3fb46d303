//! # Retry/Dead-Letter Policy
//!
//! Classifies failures and decides, per delivery attempt, between a delayed
//! requeue and dead-lettering. The delay is served by the broker's retry
//! holding queue, never by the worker sleeping in-process.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Failure classes the pipeline can exit with.
///
/// Only `Transient` ever reaches the requeue path; the other classes are
/// deterministic given the same input and retrying them wastes resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// May succeed on retry (collaborator unavailable, timeout, contention)
    Transient,
    /// Will never succeed given the same input (validation, business rule)
    Terminal,
    /// Credential rejection; answered to the caller, never retried
    Auth,
    /// Undecodable payload; dead-lettered immediately
    Malformed,
}

impl FailureClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureClass::Transient)
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureClass::Transient => write!(f, "transient"),
            FailureClass::Terminal => write!(f, "terminal"),
            FailureClass::Auth => write!(f, "auth"),
            FailureClass::Malformed => write!(f, "malformed"),
        }
    }
}

/// Outcome of a retry decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Route to the retry holding queue, invisible for `delay`
    Requeue { delay: Duration },
    /// Attempts exhausted or class not retryable
    DeadLetter,
}

/// Delay growth across attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Exponential,
}

/// Retry policy configuration and decision logic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Dead-letter once `attempt_count` reaches this
    pub max_attempts: u32,
    /// Delay before the first redelivery
    pub base_delay_ms: u64,
    /// Exponential growth cap
    pub max_delay_ms: u64,
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
            backoff: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Decide the fate of a delivery whose attempt count has just been
    /// incremented. `attempt_count` is 1-based.
    pub fn decide(&self, attempt_count: u32, failure_class: FailureClass) -> RetryDecision {
        if !failure_class.is_retryable() || attempt_count >= self.max_attempts {
            return RetryDecision::DeadLetter;
        }
        RetryDecision::Requeue {
            delay: self.delay_for(attempt_count),
        }
    }

    /// Delay applied before redelivery of the given attempt
    pub fn delay_for(&self, attempt_count: u32) -> Duration {
        let ms = match self.backoff {
            BackoffStrategy::Fixed => self.base_delay_ms,
            BackoffStrategy::Exponential => {
                let exponent = attempt_count.saturating_sub(1).min(16);
                self.base_delay_ms
                    .saturating_mul(1u64 << exponent)
                    .min(self.max_delay_ms)
            }
        };
        Duration::from_millis(ms)
    }
}
