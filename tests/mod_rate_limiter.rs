use docgate::context::CallContext;
use docgate::GatewayConfig;
use docgate::errors::ConfigError;
use docgate::ratelimit::{
    AdmissionError, CircuitBreakerConfig, CircuitState, MIN_RPS, RateLimitConfig, RateLimiter,
};
use std::time::{Duration, Instant};

fn limiter(rps: f64, burst: u32) -> RateLimiter {
    RateLimiter::new(RateLimitConfig { rps, burst, ..RateLimitConfig::default() })
}

#[test]
fn test_burst_then_rejection() {
    let rl = limiter(2.0, 2);
    assert!(rl.allow().is_ok());
    assert!(rl.allow().is_ok());
    let err = rl.allow().unwrap_err();
    assert_eq!(err, AdmissionError::RateLimited);
    assert_eq!(err.to_string(), "rate limit exceeded");

    let m = rl.metrics();
    assert_eq!((m.total_requests, m.allowed_requests, m.rejected_requests), (3, 2, 1));
}

#[test]
fn test_exactly_burst_calls_pass() {
    let rl = limiter(0.5, 7);
    let passed = (0..10).filter(|_| rl.allow().is_ok()).count();
    assert_eq!(passed, 7);
}

#[test]
fn test_non_positive_config_uses_defaults() {
    let rl = RateLimiter::new(RateLimitConfig {
        rps: 0.0,
        burst: 0,
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 0,
            recovery_timeout: Duration::ZERO,
            half_open_max_calls: 0,
        },
    });
    let cfg = rl.config();
    assert_eq!(cfg.rps, 10.0);
    assert_eq!(cfg.burst, 20);
    assert_eq!(cfg.circuit_breaker, CircuitBreakerConfig::default());
}

#[test]
fn test_open_breaker_rejects_and_counts_trip() {
    let mut cfg = RateLimitConfig::default();
    cfg.circuit_breaker.failure_threshold = 2;
    let rl = RateLimiter::new(cfg);
    rl.on_failure();
    rl.on_failure();
    assert_eq!(rl.circuit_breaker_state(), CircuitState::Open);

    let err = rl.allow().unwrap_err();
    assert_eq!(err, AdmissionError::CircuitOpen { state: CircuitState::Open });
    assert_eq!(err.to_string(), "circuit breaker is open");
    assert_eq!(rl.metrics().circuit_breaker_trips, 1);
}

#[test]
fn test_reset_metrics_keeps_breaker_state() {
    let mut cfg = RateLimitConfig::default();
    cfg.circuit_breaker.failure_threshold = 1;
    let rl = RateLimiter::new(cfg);
    rl.allow().unwrap();
    rl.on_failure();
    let before = rl.metrics().last_reset;
    rl.reset_metrics();
    let m = rl.metrics();
    assert_eq!((m.total_requests, m.allowed_requests, m.circuit_breaker_trips), (0, 0, 0));
    assert!(m.last_reset >= before);
    assert_eq!(rl.circuit_breaker_state(), CircuitState::Open);
}

#[tokio::test]
async fn test_wait_releases_when_token_refills() {
    let rl = limiter(20.0, 1);
    let ctx = CallContext::background();
    rl.wait(&ctx).await.unwrap();
    let start = Instant::now();
    rl.wait(&ctx).await.unwrap();
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(30), "waited {waited:?}");
    assert!(waited < Duration::from_millis(500), "waited {waited:?}");
    assert_eq!(rl.metrics().allowed_requests, 2);
}

#[tokio::test]
async fn test_wait_fails_fast_when_breaker_open() {
    let mut cfg = RateLimitConfig::default();
    cfg.circuit_breaker.failure_threshold = 1;
    let rl = RateLimiter::new(cfg);
    rl.on_failure();
    let start = Instant::now();
    let err = rl.wait(&CallContext::background()).await.unwrap_err();
    assert!(matches!(err, AdmissionError::CircuitOpen { .. }));
    assert!(start.elapsed() < Duration::from_millis(50));
}

#[tokio::test]
async fn test_wait_is_cancellable() {
    let rl = std::sync::Arc::new(limiter(0.2, 1));
    rl.allow().unwrap();
    let (ctx, handle) = CallContext::with_cancel();
    let waiter = {
        let rl = rl.clone();
        tokio::spawn(async move { rl.wait(&ctx).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.cancel();
    let err = waiter.await.unwrap().unwrap_err();
    assert_eq!(err, AdmissionError::Cancelled);
    assert!(err.is_context());
    assert_eq!(rl.metrics().rejected_requests, 1);
}

#[tokio::test]
async fn test_wait_longer_than_deadline_fails_up_front() {
    let rl = limiter(0.1, 1);
    rl.allow().unwrap();
    let ctx = CallContext::with_timeout(Duration::from_millis(100));
    let start = Instant::now();
    let err = rl.wait(&ctx).await.unwrap_err();
    assert!(matches!(err, AdmissionError::WouldExceedDeadline { .. }));
    assert!(start.elapsed() < Duration::from_millis(50));
}

#[tokio::test]
async fn test_wait_with_expired_context() {
    let rl = limiter(10.0, 5);
    let ctx = CallContext::with_timeout(Duration::ZERO);
    let err = rl.wait(&ctx).await.unwrap_err();
    assert_eq!(err, AdmissionError::DeadlineExceeded);
}

#[tokio::test]
async fn test_vanishing_rate_refuses_wait() {
    let rl = limiter(1e-20, 1);
    rl.allow().unwrap();
    let ctx = CallContext::with_timeout(Duration::from_millis(50));
    let err = rl.wait(&ctx).await.unwrap_err();
    assert_eq!(err, AdmissionError::RateLimited);
    assert_eq!(rl.metrics().rejected_requests, 1);
}

#[test]
fn test_rate_below_floor_fails_validation() {
    let err = GatewayConfig::from_toml_str("[rate_limit]\nrps = 1e-20\nburst = 1\n").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    let err = GatewayConfig::from_toml_str("[adaptive]\nmin_rps = 0.0\n").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    let ok = GatewayConfig::from_toml_str(&format!("[rate_limit]\nrps = {MIN_RPS}\n")).unwrap();
    assert_eq!(ok.rate_limit.rps, MIN_RPS);
}
