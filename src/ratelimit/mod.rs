//! Admission control for outbound calls: a token bucket gated by a
//! circuit breaker, plus an adaptive controller that tunes the bucket rate.

mod adaptive;
mod breaker;
mod bucket;
mod config;
mod limiter;
mod metrics;

pub use adaptive::AdaptiveRateLimiter;
pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use bucket::{MAX_RESERVE_WAIT, TokenBucket};
pub use config::{AdaptiveConfig, CircuitBreakerConfig, MIN_RPS, RateLimitConfig};
pub use limiter::{AdmissionError, RateLimiter};
pub use metrics::RateLimitMetrics;
