//! Combined resilience view: request outcomes recorded by the embedding
//! process, joined with the cache, limiter and breaker of an attached
//! orchestrator, plus a threshold-based health check over all of it.

use crate::cache::CacheStats;
use crate::errors::{CategorizedError, ErrorKind};
use crate::orchestrator::{ClientMetrics, RequestOrchestrator};
use crate::ratelimit::{CircuitState, RateLimitMetrics};
use crate::resources::GatewayClient;
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Response times kept for averages and percentiles.
const RESPONSE_WINDOW: usize = 1000;
/// Percentiles stay zero until this many samples exist.
const PERCENTILE_MIN_SAMPLES: usize = 20;

/// Error rate (percent) above which the service is unhealthy.
pub const MAX_ERROR_RATE: f64 = 10.0;
/// Average response time above which the service is unhealthy.
pub const MAX_AVERAGE_RESPONSE: Duration = Duration::from_secs(5);
/// Cache hit rate (percent) below which cache performance is flagged.
pub const MIN_CACHE_HIT_RATE: f64 = 50.0;

/// Something whose cache, limiter and breaker can be observed.
pub trait ResilienceSource: Send + Sync {
    fn upstream_metrics(&self) -> ClientMetrics;

    /// `None` when caching is disabled.
    fn cache_view(&self) -> Option<CacheView>;

    fn rate_limit_view(&self) -> RateLimitView;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CacheView {
    #[serde(flatten)]
    pub stats: CacheStats,
    pub current_size: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RateLimitView {
    #[serde(flatten)]
    pub metrics: RateLimitMetrics,
    /// Percentage of admission requests that were allowed.
    pub allowed_rate: f64,
    pub circuit_breaker_state: CircuitState,
    pub current_rps: f64,
}

impl RateLimitView {
    #[allow(clippy::cast_precision_loss)]
    fn new(metrics: RateLimitMetrics, state: CircuitState, current_rps: f64) -> Self {
        let allowed_rate = if metrics.total_requests == 0 {
            0.0
        } else {
            metrics.allowed_requests as f64 / metrics.total_requests as f64 * 100.0
        };
        Self { metrics, allowed_rate, circuit_breaker_state: state, current_rps }
    }
}

impl<T: Transport> ResilienceSource for RequestOrchestrator<T> {
    fn upstream_metrics(&self) -> ClientMetrics {
        self.client_metrics()
    }

    fn cache_view(&self) -> Option<CacheView> {
        self.cache().map(|cache| CacheView { stats: cache.stats(), current_size: cache.size() })
    }

    fn rate_limit_view(&self) -> RateLimitView {
        RateLimitView::new(self.rate_limit_metrics(), self.circuit_state(), self.current_rps())
    }
}

impl<T: Transport> ResilienceSource for GatewayClient<T> {
    fn upstream_metrics(&self) -> ClientMetrics {
        self.orchestrator().upstream_metrics()
    }

    fn cache_view(&self) -> Option<CacheView> {
        self.orchestrator().cache_view()
    }

    fn rate_limit_view(&self) -> RateLimitView {
        self.orchestrator().rate_limit_view()
    }
}

/// Recorded request outcomes.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ServerMetrics {
    pub requests_total: u64,
    pub requests_successful: u64,
    pub requests_failed: u64,
    #[serde(rename = "response_time_avg_ms", serialize_with = "crate::config::duration_ms::serialize")]
    pub response_time_avg: Duration,
    #[serde(rename = "response_time_p95_ms", serialize_with = "crate::config::duration_ms::serialize")]
    pub response_time_p95: Duration,
    #[serde(rename = "response_time_p99_ms", serialize_with = "crate::config::duration_ms::serialize")]
    pub response_time_p99: Duration,
    pub errors_by_type: BTreeMap<ErrorKind, u64>,
    #[serde(rename = "uptime_ms", serialize_with = "crate::config::duration_ms::serialize")]
    pub uptime: Duration,
}

impl ServerMetrics {
    /// Failed share in percent; `None` before the first request.
    #[allow(clippy::cast_precision_loss)]
    pub fn error_rate(&self) -> Option<f64> {
        (self.requests_total > 0)
            .then(|| self.requests_failed as f64 / self.requests_total as f64 * 100.0)
    }
}

/// Point-in-time view of everything the collector can see.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CombinedMetrics {
    pub server: ServerMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<ClientMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitView>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub healthy: bool,
    pub message: String,
}

impl CheckResult {
    fn new(healthy: bool, message: String) -> Self {
        Self { healthy, message }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub timestamp: DateTime<Utc>,
    pub checks: BTreeMap<String, CheckResult>,
}

impl HealthStatus {
    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.get(name)
    }
}

struct Recorded {
    started: Instant,
    total: u64,
    successful: u64,
    failed: u64,
    errors_by_type: BTreeMap<ErrorKind, u64>,
    response_times: VecDeque<Duration>,
}

impl Recorded {
    fn fresh() -> Self {
        Self {
            started: Instant::now(),
            total: 0,
            successful: 0,
            failed: 0,
            errors_by_type: BTreeMap::new(),
            response_times: VecDeque::with_capacity(RESPONSE_WINDOW),
        }
    }

    fn server_metrics(&self) -> ServerMetrics {
        let (p95, p99) = percentiles(&self.response_times);
        ServerMetrics {
            requests_total: self.total,
            requests_successful: self.successful,
            requests_failed: self.failed,
            response_time_avg: average(&self.response_times),
            response_time_p95: p95,
            response_time_p99: p99,
            errors_by_type: self.errors_by_type.clone(),
            uptime: self.started.elapsed(),
        }
    }
}

fn average(samples: &VecDeque<Duration>) -> Duration {
    let Ok(count) = u32::try_from(samples.len()) else { return Duration::ZERO };
    if count == 0 {
        return Duration::ZERO;
    }
    samples.iter().sum::<Duration>() / count
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn percentiles(samples: &VecDeque<Duration>) -> (Duration, Duration) {
    if samples.len() < PERCENTILE_MIN_SAMPLES {
        return (Duration::ZERO, Duration::ZERO);
    }
    let mut sorted: Vec<Duration> = samples.iter().copied().collect();
    sorted.sort_unstable();
    let at = |q: f64| {
        let idx = ((sorted.len() as f64) * q) as usize;
        sorted[idx.min(sorted.len() - 1)]
    };
    (at(0.95), at(0.99))
}

/// Collects request outcomes and evaluates service health.
///
/// Outcomes are pushed by the caller through [`record_request`](Self::record_request)
/// or [`record_outcome`](Self::record_outcome). Cache, limiter and breaker
/// figures are read from the attached [`ResilienceSource`] on every snapshot.
pub struct MetricsCollector {
    recorded: RwLock<Recorded>,
    source: RwLock<Option<Arc<dyn ResilienceSource>>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self { recorded: RwLock::new(Recorded::fresh()), source: RwLock::new(None) }
    }

    /// Observes `source` from now on, replacing any previous one.
    pub fn attach(&self, source: Arc<dyn ResilienceSource>) {
        *self.source.write() = Some(source);
    }

    pub fn detach(&self) {
        *self.source.write() = None;
    }

    pub fn record_request(&self, success: bool, response_time: Duration, error: Option<ErrorKind>) {
        let mut r = self.recorded.write();
        r.total += 1;
        if success {
            r.successful += 1;
        } else {
            r.failed += 1;
            if let Some(kind) = error {
                *r.errors_by_type.entry(kind).or_insert(0) += 1;
            }
        }
        if r.response_times.len() == RESPONSE_WINDOW {
            r.response_times.pop_front();
        }
        r.response_times.push_back(response_time);
    }

    /// Records the result of one call, taking the error kind from the failure.
    pub fn record_outcome<V>(&self, outcome: &Result<V, CategorizedError>, response_time: Duration) {
        match outcome {
            Ok(_) => self.record_request(true, response_time, None),
            Err(err) => self.record_request(false, response_time, Some(err.kind())),
        }
    }

    pub fn snapshot(&self) -> CombinedMetrics {
        let server = self.recorded.read().server_metrics();
        let source = self.source.read().clone();
        CombinedMetrics {
            server,
            upstream: source.as_ref().map(|s| s.upstream_metrics()),
            cache: source.as_ref().and_then(|s| s.cache_view()),
            rate_limit: source.as_ref().map(|s| s.rate_limit_view()),
            timestamp: Utc::now(),
        }
    }

    /// Clears recorded outcomes and restarts the uptime clock. The attached
    /// source and its own counters are left alone.
    pub fn reset(&self) {
        *self.recorded.write() = Recorded::fresh();
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    /// Evaluates the snapshot against the health thresholds.
    ///
    /// Error rate and response time come from recorded requests, or from the
    /// source's upstream metrics when nothing has been recorded. An open
    /// breaker makes the service unhealthy. A low cache hit rate is reported
    /// but does not affect overall health.
    pub fn health_check(&self) -> HealthStatus {
        let snapshot = self.snapshot();
        let mut checks = BTreeMap::new();

        let (error_rate, average) = match (&snapshot.upstream, snapshot.server.requests_total) {
            (Some(upstream), 0) => (upstream_error_rate(upstream), upstream.average_response_time),
            _ => (snapshot.server.error_rate(), snapshot.server.response_time_avg),
        };

        if let Some(rate) = error_rate {
            let check = if rate > MAX_ERROR_RATE {
                CheckResult::new(false, format!("High error rate: {rate:.2}%"))
            } else {
                CheckResult::new(true, format!("Error rate: {rate:.2}%"))
            };
            checks.insert("error_rate".to_string(), check);
        }

        let check = if average > MAX_AVERAGE_RESPONSE {
            CheckResult::new(false, format!("High response time: {average:?}"))
        } else {
            CheckResult::new(true, format!("Response time: {average:?}"))
        };
        checks.insert("response_time".to_string(), check);

        if let Some(rate_limit) = &snapshot.rate_limit {
            let state = rate_limit.circuit_breaker_state;
            let check = if state == CircuitState::Open {
                CheckResult::new(false, "Circuit breaker is open".to_string())
            } else {
                CheckResult::new(true, format!("Circuit breaker: {state}"))
            };
            checks.insert("circuit_breaker".to_string(), check);
        }

        let healthy = checks.values().all(|c| c.healthy);

        if let Some(cache) = &snapshot.cache {
            let rate = cache.stats.hit_rate;
            let check = if rate < MIN_CACHE_HIT_RATE {
                CheckResult::new(false, format!("Low cache hit rate: {rate:.2}%"))
            } else {
                CheckResult::new(true, format!("Cache hit rate: {rate:.2}%"))
            };
            checks.insert("cache_performance".to_string(), check);
        }

        if !healthy {
            let failing: Vec<&str> =
                checks.iter().filter(|(_, c)| !c.healthy).map(|(name, _)| name.as_str()).collect();
            log::warn!(target: crate::logger::METRICS_TARGET, "health check failing: {}", failing.join(", "));
        }
        HealthStatus { healthy, timestamp: snapshot.timestamp, checks }
    }
}

#[allow(clippy::cast_precision_loss)]
fn upstream_error_rate(m: &ClientMetrics) -> Option<f64> {
    (m.total_requests > 0).then(|| m.failed_requests as f64 / m.total_requests as f64 * 100.0)
}
