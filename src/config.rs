//! Gateway configuration: every tunable of the resilience layer in one
//! TOML-loadable struct. Any subset of keys may be given; the rest keep
//! their defaults.

use crate::cache::CacheConfig;
use crate::errors::ConfigError;
use crate::orchestrator::BreakerFeedback;
use crate::ratelimit::{AdaptiveConfig, MIN_RPS, RateLimitConfig};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Serde adapter storing a `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub breaker_feedback: BreakerFeedback,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub adaptive: AdaptiveConfig,
    pub retry: RetryPolicy,
}

impl GatewayConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        log::info!("loaded gateway configuration from {}", path.display());
        Ok(config)
    }

    /// Rejects combinations that cannot work. Non-positive limiter and
    /// breaker values are not errors; they fall back to defaults when the
    /// limiter is built. Positive rates below [`MIN_RPS`] are rejected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.max_size == 0 {
            return Err(ConfigError::Invalid("cache.max_size must be at least 1".into()));
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "retry.backoff_multiplier must be >= 1.0, got {}",
                self.retry.backoff_multiplier
            )));
        }
        if self.retry.max_delay < self.retry.initial_delay {
            return Err(ConfigError::Invalid(
                "retry.max_delay_ms must not be smaller than retry.initial_delay_ms".into(),
            ));
        }
        // Zero and negative rates mean "use the default" and are fine here.
        let rps = self.rate_limit.rps;
        if !rps.is_finite() || (rps > 0.0 && rps < MIN_RPS) {
            return Err(ConfigError::Invalid(format!(
                "rate_limit.rps must be at least {MIN_RPS}, got {rps}"
            )));
        }
        if !(self.adaptive.min_rps >= MIN_RPS) {
            return Err(ConfigError::Invalid(format!(
                "adaptive.min_rps must be at least {MIN_RPS}, got {}",
                self.adaptive.min_rps
            )));
        }
        if self.adaptive.min_rps > self.adaptive.max_rps {
            return Err(ConfigError::Invalid(format!(
                "adaptive.min_rps ({}) exceeds adaptive.max_rps ({})",
                self.adaptive.min_rps, self.adaptive.max_rps
            )));
        }
        Ok(())
    }
}
