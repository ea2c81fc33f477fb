use crate::context::{CallContext, ContextError};
use crate::errors::CategorizedError;
use crate::ratelimit::breaker::{CircuitBreaker, CircuitState};
use crate::ratelimit::bucket::TokenBucket;
use crate::ratelimit::config::RateLimitConfig;
use crate::ratelimit::metrics::{MetricsRecorder, RateLimitMetrics};
use std::time::Duration;
use thiserror::Error;

/// Why a call was not admitted.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("circuit breaker is {state}")]
    CircuitOpen { state: CircuitState },

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("rate limit wait of {wait:?} would exceed the context deadline")]
    WouldExceedDeadline { wait: Duration },

    #[error("admission wait cancelled")]
    Cancelled,

    #[error("deadline exceeded while waiting for admission")]
    DeadlineExceeded,
}

impl From<ContextError> for AdmissionError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => Self::Cancelled,
            ContextError::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

impl AdmissionError {
    /// True when the caller's context ended, as opposed to the limiter refusing.
    pub const fn is_context(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

impl From<AdmissionError> for CategorizedError {
    fn from(err: AdmissionError) -> Self {
        match &err {
            AdmissionError::CircuitOpen { state } => CategorizedError::circuit_open(state.as_str()),
            AdmissionError::RateLimited => CategorizedError::rate_limit(Duration::ZERO),
            AdmissionError::WouldExceedDeadline { wait } => {
                CategorizedError::rate_limit(*wait).with_details(err.to_string())
            }
            AdmissionError::Cancelled | AdmissionError::DeadlineExceeded => {
                CategorizedError::timeout("rate limit wait", Duration::ZERO).with_details(err.to_string())
            }
        }
    }
}

/// Token bucket admission gated by a circuit breaker.
///
/// Every `allow`/`wait` call counts toward `total_requests`; breaker denials
/// and empty-bucket refusals count as rejected.
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: TokenBucket,
    breaker: CircuitBreaker,
    metrics: MetricsRecorder,
}

impl RateLimiter {
    /// Non-positive settings fall back to their defaults.
    pub fn new(config: RateLimitConfig) -> Self {
        let config = config.normalized();
        Self {
            bucket: TokenBucket::new(config.rps, config.burst),
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            metrics: MetricsRecorder::new(),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Non-blocking admission. A breaker denial does not consume a token.
    pub fn allow(&self) -> Result<(), AdmissionError> {
        if !self.breaker.can_execute() {
            self.metrics.record_rejected();
            return Err(AdmissionError::CircuitOpen { state: self.breaker.state() });
        }
        if !self.bucket.try_acquire() {
            self.metrics.record_rejected();
            return Err(AdmissionError::RateLimited);
        }
        self.metrics.record_allowed();
        Ok(())
    }

    /// Blocking admission: waits for a token unless the breaker denies the
    /// call or `ctx` ends first.
    ///
    /// The wait releases the moment the reserved token exists. A wait that
    /// provably outlasts the context deadline fails up front.
    pub async fn wait(&self, ctx: &CallContext) -> Result<(), AdmissionError> {
        match self.acquire(ctx).await {
            Ok(()) => {
                self.metrics.record_allowed();
                Ok(())
            }
            Err(err) => {
                self.metrics.record_rejected();
                Err(err)
            }
        }
    }

    async fn acquire(&self, ctx: &CallContext) -> Result<(), AdmissionError> {
        if !self.breaker.can_execute() {
            return Err(AdmissionError::CircuitOpen { state: self.breaker.state() });
        }
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        let Some(delay) = self.bucket.reserve() else {
            return Err(AdmissionError::RateLimited);
        };
        if delay.is_zero() {
            return Ok(());
        }
        if let Some(remaining) = ctx.remaining()
            && delay > remaining
        {
            self.bucket.cancel_reservation();
            return Err(AdmissionError::WouldExceedDeadline { wait: delay });
        }
        log::trace!("rate limiter waiting {delay:?} for a token");
        if let Err(err) = ctx.sleep(delay).await {
            self.bucket.cancel_reservation();
            return Err(err.into());
        }
        Ok(())
    }

    pub fn on_success(&self) {
        self.breaker.on_success();
    }

    pub fn on_failure(&self) {
        if self.breaker.on_failure() {
            self.metrics.record_trip();
        }
    }

    pub fn metrics(&self) -> RateLimitMetrics {
        self.metrics.snapshot()
    }

    /// Zeroes the counters. Bucket and breaker state are untouched.
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    pub fn circuit_breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn current_rps(&self) -> f64 {
        self.bucket.rate()
    }

    pub(crate) fn set_rate(&self, rps: f64) {
        self.bucket.set_rate(rps);
    }
}
