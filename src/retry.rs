//! Retry decisions and exponential backoff.

use crate::config::duration_ms;
use crate::errors::{CategorizedError, ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Stateless retry policy: every answer is a function of the error and the
/// zero-based attempt number only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub retryable_kinds: BTreeSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            retryable_kinds: [
                ErrorKind::Network,
                ErrorKind::Timeout,
                ErrorKind::RateLimit,
                ErrorKind::CircuitBreakerOpen,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    pub fn is_retryable_kind(&self, kind: ErrorKind) -> bool {
        self.retryable_kinds.contains(&kind)
    }

    pub fn should_retry(&self, error: &CategorizedError, attempt: u32) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        self.is_retryable_kind(error.kind())
    }

    /// `min(initial_delay * backoff_multiplier^attempt, max_delay)`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exp);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// The full backoff schedule, one delay per permitted retry.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.calculate_delay(attempt))
    }
}
