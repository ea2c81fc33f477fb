use docgate::cache::Cache;
use docgate::context::CallContext;
use docgate::errors::ErrorKind;
use docgate::orchestrator::{BreakerFeedback, RequestOrchestrator};
use docgate::ratelimit::{AdaptiveRateLimiter, CircuitState, RateLimitConfig, RateLimiter};
use docgate::retry::RetryPolicy;
use docgate::test_support::ScriptedTransport;
use docgate::transport::{ApiRequest, Invalidation, TransportError};
use docgate::GatewayConfig;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        ..RetryPolicy::default()
    }
}

fn limiter(threshold: u32) -> Arc<RateLimiter> {
    let mut cfg = RateLimitConfig { rps: 1000.0, burst: 100, ..RateLimitConfig::default() };
    cfg.circuit_breaker.failure_threshold = threshold;
    Arc::new(RateLimiter::new(cfg))
}

fn orchestrator(transport: &ScriptedTransport, retries: u32) -> RequestOrchestrator<ScriptedTransport> {
    RequestOrchestrator::builder(transport.clone())
        .rate_limiter(limiter(50))
        .cache(Cache::new(100, Duration::from_secs(60)))
        .retry(fast_retry(retries))
        .build()
}

#[tokio::test]
async fn test_success_on_first_attempt() {
    let transport = ScriptedTransport::new().then_ok(json!({"id": "1"}));
    let orch = orchestrator(&transport, 3);
    let body = orch.execute(&CallContext::background(), &ApiRequest::get("/items/1")).await.unwrap();
    assert_eq!(body, json!({"id": "1"}));
    assert_eq!(transport.call_count(), 1);
    let m = orch.client_metrics();
    assert_eq!((m.total_requests, m.successful_requests, m.failed_requests), (1, 1, 0));
    assert!(m.last_request_time.is_some());
}

#[tokio::test]
async fn test_cached_read_skips_limiter_and_transport() {
    let transport = ScriptedTransport::new().then_ok(json!({"id": "1"}));
    let orch = orchestrator(&transport, 0);
    let ctx = CallContext::background();
    let req = ApiRequest::get("/items/1").cached("GET:/items/1", Duration::from_secs(60));

    let first = orch.execute(&ctx, &req).await.unwrap();
    let second = orch.execute(&ctx, &req).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(transport.call_count(), 1);
    assert_eq!(orch.rate_limit_metrics().total_requests, 1);

    let m = orch.client_metrics();
    assert_eq!((m.cache_hits, m.cache_misses), (1, 1));
    assert_eq!((m.total_requests, m.successful_requests, m.failed_requests), (2, 2, 0));
    let stats = orch.cache_stats().unwrap();
    assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let transport = ScriptedTransport::new()
        .then_error(TransportError::Connect("refused".into()))
        .then_status(503, Value::Null)
        .then_ok(json!({"ok": true}));
    let orch = orchestrator(&transport, 3);
    let body = orch.execute(&CallContext::background(), &ApiRequest::get("/items")).await;
    assert_eq!(body.unwrap(), json!({"ok": true}));
    assert_eq!(transport.call_count(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_return_last_error() {
    let transport = ScriptedTransport::new().otherwise(Err(TransportError::Timeout(Duration::from_secs(1))));
    let orch = orchestrator(&transport, 2);
    let err = orch.execute(&CallContext::background(), &ApiRequest::get("/items")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(transport.call_count(), 3);
    assert_eq!(err.context().get("attempts"), Some(&json!(3)));
    assert_eq!(orch.client_metrics().failed_requests, 1);
}

#[tokio::test]
async fn test_non_retryable_error_returns_immediately() {
    let transport = ScriptedTransport::new().then_status(404, json!({"message": "no such item"}));
    let orch = orchestrator(&transport, 3);
    let err = orch.execute(&CallContext::background(), &ApiRequest::get("/items/9")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.details(), Some("no such item"));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn test_client_errors_do_not_trip_breaker_by_default() {
    let transport = ScriptedTransport::new().otherwise(Ok(docgate::UpstreamResponse::new(404, Value::Null)));
    let orch = RequestOrchestrator::builder(transport.clone())
        .rate_limiter(limiter(2))
        .retry(RetryPolicy::none())
        .build();
    let ctx = CallContext::background();
    for _ in 0..5 {
        let _ = orch.execute(&ctx, &ApiRequest::get("/items/x")).await;
    }
    assert_eq!(orch.circuit_state(), CircuitState::Closed);
    assert_eq!(transport.call_count(), 5);
}

#[tokio::test]
async fn test_all_failures_feedback_trips_on_client_errors() {
    let transport = ScriptedTransport::new().otherwise(Ok(docgate::UpstreamResponse::new(404, Value::Null)));
    let orch = RequestOrchestrator::builder(transport.clone())
        .rate_limiter(limiter(2))
        .retry(RetryPolicy::none())
        .breaker_feedback(BreakerFeedback::AllFailures)
        .build();
    let ctx = CallContext::background();
    for _ in 0..2 {
        let _ = orch.execute(&ctx, &ApiRequest::get("/items/x")).await;
    }
    assert_eq!(orch.circuit_state(), CircuitState::Open);
}

#[tokio::test]
async fn test_open_breaker_short_circuits_calls() {
    let transport = ScriptedTransport::new().otherwise(Ok(docgate::UpstreamResponse::new(500, Value::Null)));
    let orch = RequestOrchestrator::builder(transport.clone())
        .rate_limiter(limiter(2))
        .retry(RetryPolicy::none())
        .build();
    let ctx = CallContext::background();
    for _ in 0..2 {
        let err = orch.execute(&ctx, &ApiRequest::get("/items")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamApi);
    }
    assert_eq!(orch.circuit_state(), CircuitState::Open);

    let err = orch.execute(&ctx, &ApiRequest::get("/items")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircuitBreakerOpen);
    assert!(err.user_message().contains("temporarily unavailable"));
    assert_eq!(transport.call_count(), 2);
    assert_eq!(orch.rate_limit_metrics().circuit_breaker_trips, 1);
}

#[tokio::test]
async fn test_cancel_during_backoff_aborts_with_timeout() {
    let transport = ScriptedTransport::new().otherwise(Err(TransportError::Connect("down".into())));
    let orch = RequestOrchestrator::builder(transport.clone())
        .rate_limiter(limiter(50))
        .retry(RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(10),
            ..RetryPolicy::default()
        })
        .build();
    let ctx = CallContext::with_timeout(Duration::from_millis(50));
    let start = Instant::now();
    let err = orch.execute(&ctx, &ApiRequest::get("/items")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn test_cancel_during_transport_call() {
    let transport = ScriptedTransport::new().with_latency(Duration::from_secs(10));
    let orch = orchestrator(&transport, 3);
    let (ctx, handle) = docgate::CallContext::with_cancel();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
    });
    let start = Instant::now();
    let err = orch.execute(&ctx, &ApiRequest::get("/items")).await.unwrap_err();
    canceller.await.unwrap();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn test_mutation_invalidates_cached_entries() {
    let transport = ScriptedTransport::new()
        .then_ok(json!({"id": "1", "title": "old"}))
        .then_ok(json!({"id": "1", "title": "new"}))
        .then_ok(json!({"id": "1", "title": "new"}));
    let orch = orchestrator(&transport, 0);
    let ctx = CallContext::background();
    let read = ApiRequest::get("/items/1").cached("GET:/items/1", Duration::from_secs(60));

    orch.execute(&ctx, &read).await.unwrap();
    assert!(orch.cache().unwrap().contains("GET:/items/1"));

    let update = ApiRequest::patch("/items/1", json!({"title": "new"}))
        .invalidating(Invalidation::Key("GET:/items/1".into()));
    orch.execute(&ctx, &update).await.unwrap();
    assert!(!orch.cache().unwrap().contains("GET:/items/1"));

    let fresh = orch.execute(&ctx, &read).await.unwrap();
    assert_eq!(fresh["title"], json!("new"));
    assert_eq!(transport.call_count(), 3);
}

#[tokio::test]
async fn test_failed_mutation_keeps_cache() {
    let transport = ScriptedTransport::new()
        .then_ok(json!({"id": "1"}))
        .then_status(409, Value::Null);
    let orch = orchestrator(&transport, 0);
    let ctx = CallContext::background();
    let read = ApiRequest::get("/items/1").cached("GET:/items/1", Duration::from_secs(60));
    orch.execute(&ctx, &read).await.unwrap();

    let update = ApiRequest::patch("/items/1", json!({}))
        .invalidating(Invalidation::Key("GET:/items/1".into()));
    let err = orch.execute(&ctx, &update).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(orch.cache().unwrap().contains("GET:/items/1"));
}

#[tokio::test]
async fn test_adaptive_admission_adjusts_after_calls() {
    let transport = ScriptedTransport::new();
    let adaptive = Arc::new(
        AdaptiveRateLimiter::new(RateLimitConfig { rps: 10.0, burst: 50, ..RateLimitConfig::default() }, 1.0, 50.0)
            .with_adjust_period(Duration::ZERO),
    );
    let orch = RequestOrchestrator::builder(transport).adaptive(adaptive.clone()).build();
    orch.execute(&CallContext::background(), &ApiRequest::get("/teams")).await.unwrap();
    assert!(adaptive.current_rps() > 10.0);
    assert!((orch.current_rps() - adaptive.current_rps()).abs() < 1e-9);
}

#[tokio::test]
async fn test_built_from_config() {
    let config = GatewayConfig::from_toml_str(
        r#"
        [cache]
        enabled = false

        [rate_limit]
        rps = 5.0
        burst = 3
        "#,
    )
    .unwrap();
    let orch = RequestOrchestrator::new(ScriptedTransport::new(), &config);
    assert!(orch.cache().is_none());
    assert!(orch.cache_stats().is_none());
    assert!((orch.current_rps() - 5.0).abs() < 1e-9);
    assert_eq!(orch.retry_policy().max_retries, 3);
}

#[tokio::test]
async fn test_average_response_time_smoothing() {
    let transport = ScriptedTransport::new().with_latency(Duration::from_millis(20));
    let orch = orchestrator(&transport, 0);
    let ctx = CallContext::background();
    orch.execute(&ctx, &ApiRequest::get("/a")).await.unwrap();
    let first = orch.client_metrics().average_response_time;
    assert!(first >= Duration::from_millis(20));
    orch.execute(&ctx, &ApiRequest::get("/b")).await.unwrap();
    let second = orch.client_metrics().average_response_time;
    assert!(second >= Duration::from_millis(20));
    assert_eq!(orch.client_metrics().total_requests, 2);
}
