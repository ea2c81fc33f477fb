//! Three-state circuit breaker.
//!
//! ```text
//! Closed   -> Open     : consecutive failures reach failure_threshold
//! Open     -> HalfOpen : first can_execute() after recovery_timeout since the last failure
//! HalfOpen -> Closed   : half_open_max_calls successes
//! HalfOpen -> Open     : any failure
//! ```
//!
//! Open -> HalfOpen fires lazily inside `can_execute`; no timer thread runs
//! per breaker. A breaker that is never consulted stays Open.

use crate::ratelimit::config::CircuitBreakerConfig;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use serde::Serialize;
use std::fmt;
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

/// Point-in-time view of a breaker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure: Option<Instant>,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: RwLock<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a call may go out now. May move Open to HalfOpen.
    pub fn can_execute(&self) -> bool {
        let guard = self.state.upgradable_read();
        match guard.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => guard.success_count < self.config.half_open_max_calls,
            CircuitState::Open => {
                let now = Instant::now();
                if !self.recovery_elapsed(guard.last_failure, now) {
                    return false;
                }
                let mut state = RwLockUpgradableReadGuard::upgrade(guard);
                state.state = CircuitState::HalfOpen;
                state.success_count = 0;
                log::info!("circuit breaker half-open, probing upstream");
                true
            }
        }
    }

    fn recovery_elapsed(&self, last_failure: Option<Instant>, now: Instant) -> bool {
        last_failure.is_none_or(|t| now.saturating_duration_since(t) > self.config.recovery_timeout)
    }

    pub fn on_success(&self) {
        let mut state = self.state.write();
        match state.state {
            CircuitState::Closed => state.failure_count = 0,
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.half_open_max_calls {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    log::info!("circuit breaker closed after successful probes");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Records a failure. Returns `true` when this failure opened the breaker.
    pub fn on_failure(&self) -> bool {
        let mut state = self.state.write();
        state.last_failure = Some(Instant::now());
        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    log::warn!(
                        "circuit breaker opened after {} consecutive failures",
                        state.failure_count
                    );
                    return true;
                }
                false
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.success_count = 0;
                log::warn!("circuit breaker re-opened, probe failed");
                true
            }
            CircuitState::Open => false,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.read().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let s = *self.state.read();
        BreakerSnapshot {
            state: s.state,
            failure_count: s.failure_count,
            success_count: s.success_count,
            last_failure: s.last_failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn breaker(threshold: u32, recovery_ms: u64, half_open: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_millis(recovery_ms),
            half_open_max_calls: half_open,
        })
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let cb = breaker(3, 1000, 1);
        cb.on_failure();
        cb.on_failure();
        cb.on_success();
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 1);
    }

    #[test]
    fn open_rejects_until_recovery() {
        let cb = breaker(1, 10_000, 1);
        assert!(cb.on_failure());
        assert!(!cb.can_execute());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn failures_while_open_do_not_count_as_trips() {
        let cb = breaker(1, 10_000, 1);
        assert!(cb.on_failure());
        assert!(!cb.on_failure());
    }
}
