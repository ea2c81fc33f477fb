use crate::ratelimit::breaker::CircuitState;
use crate::ratelimit::config::{AdaptiveConfig, MIN_RPS, RateLimitConfig};
use crate::ratelimit::limiter::RateLimiter;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

const INCREASE_ABOVE: f64 = 0.95;
const DECREASE_BELOW: f64 = 0.8;
const STEP_UP: f64 = 1.1;
const STEP_DOWN: f64 = 0.9;

struct AdjustState {
    current_rps: f64,
    last_adjust: Instant,
}

/// A [`RateLimiter`] whose rate is tuned by [`adjust`](Self::adjust) from the
/// success ratio observed since the previous adjustment.
///
/// The caller drives `adjust`; nothing is scheduled internally.
pub struct AdaptiveRateLimiter {
    limiter: RateLimiter,
    base_rps: f64,
    min_rps: f64,
    max_rps: f64,
    adjust_period: Duration,
    state: Mutex<AdjustState>,
}

impl AdaptiveRateLimiter {
    /// Starts at `base.rps` clamped to `[min_rps, max_rps]`. `min_rps` is
    /// raised to [`MIN_RPS`] if lower.
    pub fn new(base: RateLimitConfig, min_rps: f64, max_rps: f64) -> Self {
        Self::from_config(
            base,
            &AdaptiveConfig { enabled: true, min_rps, max_rps, ..AdaptiveConfig::default() },
        )
    }

    pub fn from_config(base: RateLimitConfig, adaptive: &AdaptiveConfig) -> Self {
        let limiter = RateLimiter::new(base);
        let min_rps = adaptive.min_rps.max(MIN_RPS);
        let max_rps = adaptive.max_rps.max(min_rps);
        let base_rps = limiter.config().rps;
        let current_rps = base_rps.clamp(min_rps, max_rps);
        limiter.set_rate(current_rps);
        Self {
            limiter,
            base_rps,
            min_rps,
            max_rps,
            adjust_period: adaptive.adjust_period,
            state: Mutex::new(AdjustState { current_rps, last_adjust: Instant::now() }),
        }
    }

    #[must_use]
    pub fn with_adjust_period(mut self, period: Duration) -> Self {
        self.adjust_period = period;
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn current_rps(&self) -> f64 {
        self.state.lock().current_rps
    }

    pub fn base_rps(&self) -> f64 {
        self.base_rps
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min_rps, self.max_rps)
    }

    /// Re-evaluates the rate once per adjust period.
    ///
    /// Returns the rate now in force, or `None` when the period has not
    /// elapsed or no traffic was seen since the last reset.
    pub fn adjust(&self) -> Option<f64> {
        let mut state = self.state.lock();
        let now = Instant::now();
        if now.saturating_duration_since(state.last_adjust) < self.adjust_period {
            return None;
        }
        let metrics = self.limiter.metrics();
        if metrics.total_requests == 0 {
            return None;
        }

        let success_rate = metrics.success_rate();
        let breaker_closed = self.limiter.circuit_breaker_state() == CircuitState::Closed;
        let previous = state.current_rps;
        if success_rate > INCREASE_ABOVE && breaker_closed {
            state.current_rps = (previous * STEP_UP).min(self.max_rps);
        } else if success_rate < DECREASE_BELOW || !breaker_closed {
            state.current_rps = (previous * STEP_DOWN).max(self.min_rps);
        }

        self.limiter.set_rate(state.current_rps);
        state.last_adjust = now;
        self.limiter.reset_metrics();

        log::info!(
            target: crate::logger::METRICS_TARGET,
            "adaptive rate {previous:.2} -> {:.2} rps (success_rate={success_rate:.3}, breaker={})",
            state.current_rps,
            self.limiter.circuit_breaker_state()
        );
        Some(state.current_rps)
    }
}
