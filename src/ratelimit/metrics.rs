use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Admission counters since the last reset.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RateLimitMetrics {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub rejected_requests: u64,
    pub circuit_breaker_trips: u64,
    pub last_reset: DateTime<Utc>,
}

impl RateLimitMetrics {
    fn fresh() -> Self {
        Self {
            total_requests: 0,
            allowed_requests: 0,
            rejected_requests: 0,
            circuit_breaker_trips: 0,
            last_reset: Utc::now(),
        }
    }

    /// Allowed over total; 1.0 when nothing has been requested yet.
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 1.0;
        }
        self.allowed_requests as f64 / self.total_requests as f64
    }
}

pub(crate) struct MetricsRecorder {
    inner: RwLock<RateLimitMetrics>,
}

impl MetricsRecorder {
    pub(crate) fn new() -> Self {
        Self { inner: RwLock::new(RateLimitMetrics::fresh()) }
    }

    pub(crate) fn record_allowed(&self) {
        let mut m = self.inner.write();
        m.total_requests += 1;
        m.allowed_requests += 1;
    }

    pub(crate) fn record_rejected(&self) {
        let mut m = self.inner.write();
        m.total_requests += 1;
        m.rejected_requests += 1;
    }

    pub(crate) fn record_trip(&self) {
        self.inner.write().circuit_breaker_trips += 1;
    }

    pub(crate) fn snapshot(&self) -> RateLimitMetrics {
        self.inner.read().clone()
    }

    pub(crate) fn reset(&self) {
        *self.inner.write() = RateLimitMetrics::fresh();
    }
}
