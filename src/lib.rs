//! Resilience layer for calls to a document-workspace REST API: response
//! caching, token-bucket admission behind a circuit breaker, categorized
//! errors, retry with exponential backoff, and a combined health view.

pub mod cache;
pub mod classify;
pub mod config;
pub mod context;
pub mod errors;
pub mod logger;
pub mod monitoring;
pub mod orchestrator;
pub mod ratelimit;
pub mod resources;
pub mod retry;
pub mod test_support;
pub mod transport;

pub use cache::{Cache, CacheConfig, CacheStats, ResourceKind};
pub use config::GatewayConfig;
pub use context::{CallContext, CancelHandle, ContextError};
pub use errors::{CategorizedError, ConfigError, ErrorKind, Severity};
pub use monitoring::{HealthStatus, MetricsCollector, ResilienceSource};
pub use orchestrator::{BreakerFeedback, ClientMetrics, RequestOrchestrator};
pub use ratelimit::{
    AdaptiveRateLimiter, AdmissionError, CircuitBreaker, CircuitState, RateLimitConfig, RateLimiter,
};
pub use resources::{GatewayClient, InMemoryResources, ListParams, ResourceApi, ResourceFamily, SearchQuery};
pub use retry::RetryPolicy;
pub use transport::{ApiRequest, Method, Transport, TransportError, UpstreamResponse};

/// Sets up logging from `DOCGATE_LOG_*` environment variables.
///
/// Call once at process start; the library never installs a logger itself.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    logger::configure_from_env()
}
