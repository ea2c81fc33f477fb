//! One logical upstream call: cache read-through, admission, transport,
//! classification, breaker feedback, retry with backoff, cache write-through.

use crate::cache::{Cache, CacheStats};
use crate::classify::classify;
use crate::config::GatewayConfig;
use crate::context::CallContext;
use crate::errors::CategorizedError;
use crate::ratelimit::{AdaptiveRateLimiter, CircuitState, RateLimitMetrics, RateLimiter};
use crate::retry::RetryPolicy;
use crate::transport::{ApiRequest, Invalidation, Transport};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Which classified failures count against the circuit breaker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerFeedback {
    /// Only network, timeout and upstream-API failures trip the breaker. Any
    /// other answer proves the upstream is reachable and counts as a success.
    #[default]
    InfrastructureOnly,
    /// Every classified upstream failure counts.
    AllFailures,
}

/// Admission control in front of the transport.
#[derive(Clone)]
pub enum Admission {
    Fixed(Arc<RateLimiter>),
    Adaptive(Arc<AdaptiveRateLimiter>),
}

impl Admission {
    pub fn limiter(&self) -> &RateLimiter {
        match self {
            Self::Fixed(limiter) => limiter,
            Self::Adaptive(adaptive) => adaptive.limiter(),
        }
    }

    fn adjust(&self) {
        if let Self::Adaptive(adaptive) = self {
            adaptive.adjust();
        }
    }
}

/// Client-side view of call volume and latency.
///
/// Every `execute` call is counted once in `total_requests` and once in
/// either `successful_requests` or `failed_requests`; cache hits are
/// successful requests.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ClientMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Smoothed as `(previous + sample) / 2`.
    pub average_response_time: Duration,
    pub last_request_time: Option<DateTime<Utc>>,
}

enum AttemptError {
    /// The attempt failed; the retry policy decides what happens next.
    Failed(CategorizedError),
    /// The caller's context ended; no further attempts.
    Aborted(CategorizedError),
}

pub struct RequestOrchestrator<T> {
    transport: T,
    admission: Admission,
    cache: Option<Cache<Value>>,
    retry: RetryPolicy,
    feedback: BreakerFeedback,
    metrics: RwLock<ClientMetrics>,
}

pub struct OrchestratorBuilder<T> {
    transport: T,
    admission: Option<Admission>,
    cache: Option<Cache<Value>>,
    retry: RetryPolicy,
    feedback: BreakerFeedback,
}

impl<T: Transport> OrchestratorBuilder<T> {
    #[must_use]
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.admission = Some(Admission::Fixed(limiter));
        self
    }

    #[must_use]
    pub fn adaptive(mut self, limiter: Arc<AdaptiveRateLimiter>) -> Self {
        self.admission = Some(Admission::Adaptive(limiter));
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: Cache<Value>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    #[must_use]
    pub fn breaker_feedback(mut self, feedback: BreakerFeedback) -> Self {
        self.feedback = feedback;
        self
    }

    /// Without an explicit limiter a default [`RateLimiter`] is used.
    pub fn build(self) -> RequestOrchestrator<T> {
        let admission = self
            .admission
            .unwrap_or_else(|| Admission::Fixed(Arc::new(RateLimiter::new(Default::default()))));
        RequestOrchestrator {
            transport: self.transport,
            admission,
            cache: self.cache,
            retry: self.retry,
            feedback: self.feedback,
            metrics: RwLock::new(ClientMetrics::default()),
        }
    }
}

impl<T: Transport> RequestOrchestrator<T> {
    pub fn builder(transport: T) -> OrchestratorBuilder<T> {
        OrchestratorBuilder {
            transport,
            admission: None,
            cache: None,
            retry: RetryPolicy::default(),
            feedback: BreakerFeedback::default(),
        }
    }

    /// Wires every component from one configuration.
    pub fn new(transport: T, config: &GatewayConfig) -> Self {
        let mut builder = Self::builder(transport)
            .retry(config.retry.clone())
            .breaker_feedback(config.breaker_feedback);
        builder = if config.adaptive.enabled {
            builder.adaptive(Arc::new(AdaptiveRateLimiter::from_config(
                config.rate_limit.clone(),
                &config.adaptive,
            )))
        } else {
            builder.rate_limiter(Arc::new(RateLimiter::new(config.rate_limit.clone())))
        };
        if config.cache.enabled {
            builder = builder.cache(Cache::from_config(&config.cache));
        }
        builder.build()
    }

    /// Runs `request` to completion.
    ///
    /// Cached reads return without touching the limiter or the transport.
    /// Otherwise attempts repeat while the retry policy allows, sleeping the
    /// backoff delay between them. Cancellation or deadline expiry during a
    /// wait or sleep ends the call with a `Timeout` error.
    pub async fn execute(&self, ctx: &CallContext, request: &ApiRequest) -> Result<Value, CategorizedError> {
        let started = Instant::now();
        let result = self.run(ctx, request).await;
        self.record_call(started.elapsed());
        self.admission.adjust();
        result
    }

    async fn run(&self, ctx: &CallContext, request: &ApiRequest) -> Result<Value, CategorizedError> {
        if let (Some(cache), Some(directive)) = (&self.cache, &request.cache) {
            if let Some(hit) = cache.get(&directive.key) {
                let mut m = self.metrics.write();
                m.cache_hits += 1;
                m.successful_requests += 1;
                drop(m);
                log::debug!("cache hit for {}", directive.key);
                return Ok(hit);
            }
            self.metrics.write().cache_misses += 1;
        }

        let mut attempt: u32 = 0;
        loop {
            let err = match self.attempt(ctx, request).await {
                Ok(body) => {
                    self.metrics.write().successful_requests += 1;
                    self.after_success(request, &body);
                    return Ok(body);
                }
                Err(AttemptError::Aborted(err)) => {
                    self.metrics.write().failed_requests += 1;
                    return Err(err);
                }
                Err(AttemptError::Failed(err)) => err,
            };

            if !self.retry.should_retry(&err, attempt) {
                self.metrics.write().failed_requests += 1;
                return Err(err.with_context("attempts", attempt + 1));
            }

            let delay = self.retry.calculate_delay(attempt);
            log::warn!(
                "{} failed on attempt {}: {err}; retrying in {delay:?}",
                request.operation(),
                attempt + 1
            );
            if let Err(cancelled) = ctx.sleep(delay).await {
                self.metrics.write().failed_requests += 1;
                return Err(CategorizedError::timeout("request_retry", delay)
                    .with_details(cancelled.to_string())
                    .with_source(err)
                    .with_context("attempts", attempt + 1));
            }
            attempt += 1;
        }
    }

    async fn attempt(&self, ctx: &CallContext, request: &ApiRequest) -> Result<Value, AttemptError> {
        let limiter = self.admission.limiter();
        if let Err(refused) = limiter.wait(ctx).await {
            if refused.is_context() {
                return Err(AttemptError::Aborted(CategorizedError::from(refused)));
            }
            log::debug!("admission refused for {}: {refused}", request.operation());
            return Err(AttemptError::Failed(CategorizedError::from(refused)));
        }

        let outcome = tokio::select! {
            biased;
            reason = ctx.done() => {
                let err = CategorizedError::timeout(&request.operation(), Duration::ZERO)
                    .with_details(reason.to_string());
                return Err(AttemptError::Aborted(err));
            }
            outcome = self.transport.send(request) => outcome,
        };

        match outcome {
            Ok(resp) if resp.is_success() => {
                limiter.on_success();
                Ok(resp.body)
            }
            other => {
                let err = classify(request, &other)
                    .unwrap_or_else(|| CategorizedError::internal(&request.operation()));
                err.log();
                self.feed_breaker(&err);
                Err(AttemptError::Failed(err))
            }
        }
    }

    fn feed_breaker(&self, err: &CategorizedError) {
        let limiter = self.admission.limiter();
        match self.feedback {
            BreakerFeedback::InfrastructureOnly if !err.kind().is_infrastructure() => limiter.on_success(),
            _ => limiter.on_failure(),
        }
    }

    fn after_success(&self, request: &ApiRequest, body: &Value) {
        let Some(cache) = &self.cache else { return };
        if let Some(directive) = &request.cache {
            cache.set_with_ttl(directive.key.clone(), body.clone(), directive.ttl);
        }
        for invalidation in &request.invalidate {
            self.apply_invalidation(cache, invalidation);
        }
    }

    fn apply_invalidation(&self, cache: &Cache<Value>, invalidation: &Invalidation) {
        let removed = match invalidation {
            Invalidation::Key(key) => usize::from(cache.delete(key)),
            Invalidation::Prefix(prefix) => cache.delete_prefix(prefix),
            Invalidation::Containing(fragment) => cache.delete_containing(fragment),
        };
        if removed > 0 {
            log::debug!("invalidated {removed} cache entries for {invalidation:?}");
        }
    }

    fn record_call(&self, elapsed: Duration) {
        let mut m = self.metrics.write();
        m.total_requests += 1;
        m.last_request_time = Some(Utc::now());
        m.average_response_time = if m.average_response_time.is_zero() {
            elapsed
        } else {
            (m.average_response_time + elapsed) / 2
        };
    }

    /// Drops cache entries outside of a request, e.g. after an out-of-band change.
    pub fn invalidate(&self, invalidation: &Invalidation) {
        if let Some(cache) = &self.cache {
            self.apply_invalidation(cache, invalidation);
        }
    }

    pub fn client_metrics(&self) -> ClientMetrics {
        self.metrics.read().clone()
    }

    pub fn rate_limit_metrics(&self) -> RateLimitMetrics {
        self.admission.limiter().metrics()
    }

    /// `None` when caching is disabled.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(Cache::stats)
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    pub fn cache(&self) -> Option<&Cache<Value>> {
        self.cache.as_ref()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.admission.limiter().circuit_breaker_state()
    }

    pub fn current_rps(&self) -> f64 {
        self.admission.limiter().current_rps()
    }

    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
