use crate::config::duration_ms;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Slowest refill rate a limiter is configured with. Adaptive limiters never
/// scale below it.
pub const MIN_RPS: f64 = 0.01;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(rename = "recovery_timeout_ms", with = "duration_ms")]
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub rps: f64,
    pub burst: u32,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { rps: 10.0, burst: 20, circuit_breaker: CircuitBreakerConfig::default() }
    }
}

impl RateLimitConfig {
    /// Replaces non-positive values with the defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if !(self.rps.is_finite() && self.rps > 0.0) {
            self.rps = defaults.rps;
        }
        if self.burst == 0 {
            self.burst = defaults.burst;
        }
        let cb = &mut self.circuit_breaker;
        if cb.failure_threshold == 0 {
            cb.failure_threshold = defaults.circuit_breaker.failure_threshold;
        }
        if cb.recovery_timeout.is_zero() {
            cb.recovery_timeout = defaults.circuit_breaker.recovery_timeout;
        }
        if cb.half_open_max_calls == 0 {
            cb.half_open_max_calls = defaults.circuit_breaker.half_open_max_calls;
        }
        self
    }
}

/// Settings for [`AdaptiveRateLimiter`](super::AdaptiveRateLimiter).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    pub min_rps: f64,
    pub max_rps: f64,
    #[serde(rename = "adjust_period_ms", with = "duration_ms")]
    pub adjust_period: Duration,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self { enabled: false, min_rps: 1.0, max_rps: 50.0, adjust_period: Duration::from_secs(30) }
    }
}
