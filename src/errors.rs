//! Categorized errors for upstream calls.
//!
//! Every outcome of an outbound call that is not a success ends up as a
//! [`CategorizedError`]: one [`ErrorKind`], a stable code, a severity and a
//! bag of diagnostic context. The protocol layer renders these into tool
//! error payloads through [`CategorizedError::to_json`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    RateLimit,
    Network,
    Timeout,
    NotFound,
    Conflict,
    #[serde(rename = "circuit_breaker")]
    CircuitBreakerOpen,
    #[serde(rename = "api")]
    UpstreamApi,
    Internal,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 11] = [
        ErrorKind::Validation,
        ErrorKind::Authentication,
        ErrorKind::Authorization,
        ErrorKind::RateLimit,
        ErrorKind::Network,
        ErrorKind::Timeout,
        ErrorKind::NotFound,
        ErrorKind::Conflict,
        ErrorKind::CircuitBreakerOpen,
        ErrorKind::UpstreamApi,
        ErrorKind::Internal,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::RateLimit => "rate_limit",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::CircuitBreakerOpen => "circuit_breaker",
            Self::UpstreamApi => "api",
            Self::Internal => "internal",
        }
    }

    /// Kinds that say something about the health of the upstream service
    /// rather than about the request itself.
    #[must_use]
    pub const fn is_infrastructure(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::UpstreamApi)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Log level used when an error of this severity is reported.
    #[must_use]
    pub const fn log_level(self) -> log::Level {
        match self {
            Self::Critical | Self::High => log::Level::Error,
            Self::Medium => log::Level::Warn,
            Self::Low => log::Level::Info,
        }
    }
}

/// A classified failure with diagnostic context.
///
/// Built once through the constructors below plus the `with_*` attachments;
/// afterwards only read through accessors.
#[derive(Clone, Debug)]
pub struct CategorizedError {
    kind: ErrorKind,
    code: String,
    message: String,
    details: Option<String>,
    http_status: Option<u16>,
    severity: Severity,
    retryable: bool,
    timestamp: DateTime<Utc>,
    context: BTreeMap<String, Value>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl CategorizedError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            details: None,
            http_status: None,
            severity: Severity::Medium,
            retryable: false,
            timestamp: Utc::now(),
            context: BTreeMap::new(),
            source: None,
        }
    }

    pub fn validation(field: &str, message: &str) -> Self {
        Self::new(
            ErrorKind::Validation,
            "VALIDATION_ERROR",
            format!("Validation failed for field '{field}': {message}"),
        )
        .with_http_status(400)
        .with_severity(Severity::Low)
        .with_context("field", field)
    }

    pub fn required_field(field: &str) -> Self {
        Self::validation(field, "field is required")
    }

    pub fn authentication(message: &str) -> Self {
        Self::new(ErrorKind::Authentication, "AUTH_ERROR", message)
            .with_http_status(401)
            .with_severity(Severity::High)
    }

    pub fn authorization(resource: &str) -> Self {
        Self::new(
            ErrorKind::Authorization,
            "FORBIDDEN",
            format!("Access denied to resource: {resource}"),
        )
        .with_http_status(403)
        .with_severity(Severity::High)
        .with_context("resource", resource)
    }

    /// Rate budget exhausted; `reset_after` is the caller's best estimate of
    /// when capacity returns.
    pub fn rate_limit(reset_after: Duration) -> Self {
        let reset_at = chrono::Duration::from_std(reset_after)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or_else(Utc::now);
        Self::new(ErrorKind::RateLimit, "RATE_LIMIT_EXCEEDED", "Rate limit exceeded")
            .with_http_status(429)
            .with_retryable(true)
            .with_context("reset_time", reset_at.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn network(operation: &str) -> Self {
        Self::new(
            ErrorKind::Network,
            "NETWORK_ERROR",
            format!("Network error during {operation}"),
        )
        .with_retryable(true)
        .with_context("operation", operation)
    }

    pub fn timeout(operation: &str, after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            "TIMEOUT",
            format!("Operation {operation} timed out after {after:?}"),
        )
        .with_http_status(408)
        .with_retryable(true)
        .with_context("operation", operation)
        .with_context("timeout_ms", u64::try_from(after.as_millis()).unwrap_or(u64::MAX))
    }

    /// Error answered by the upstream API itself. 5xx answers are `High`.
    pub fn upstream_api(http_status: u16, code: &str, message: &str) -> Self {
        let severity = if http_status >= 500 { Severity::High } else { Severity::Medium };
        Self::new(ErrorKind::UpstreamApi, code, message)
            .with_http_status(http_status)
            .with_severity(severity)
            .with_retryable(http_status == 429 || http_status >= 500)
    }

    pub fn not_found(resource: &str, id: &str) -> Self {
        Self::new(ErrorKind::NotFound, "NOT_FOUND", format!("{resource} with ID {id} not found"))
            .with_http_status(404)
            .with_severity(Severity::Low)
            .with_context("resource", resource)
            .with_context("id", id)
    }

    pub fn conflict(resource: &str, reason: &str) -> Self {
        Self::new(ErrorKind::Conflict, "CONFLICT", format!("Conflict with {resource}: {reason}"))
            .with_http_status(409)
            .with_context("resource", resource)
            .with_context("reason", reason)
    }

    pub fn circuit_open(state: &str) -> Self {
        Self::new(
            ErrorKind::CircuitBreakerOpen,
            "CIRCUIT_BREAKER_OPEN",
            format!("Circuit breaker is {state}"),
        )
        .with_retryable(true)
        .with_severity(Severity::High)
        .with_context("circuit_breaker_state", state)
    }

    pub fn internal(operation: &str) -> Self {
        Self::new(
            ErrorKind::Internal,
            "INTERNAL_ERROR",
            format!("Internal error during {operation}"),
        )
        .with_http_status(500)
        .with_severity(Severity::Critical)
        .with_context("operation", operation)
    }

    #[must_use]
    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    #[must_use]
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }

    /// Text suitable for showing to the end user of a tool call.
    pub fn user_message(&self) -> String {
        match self.kind {
            ErrorKind::CircuitBreakerOpen => {
                "The document service is temporarily unavailable, please retry later".to_string()
            }
            ErrorKind::RateLimit => {
                "Too many requests to the document service, please retry shortly".to_string()
            }
            _ => self.message.clone(),
        }
    }

    /// Structured rendering for the protocol layer.
    pub fn to_json(&self) -> Value {
        let mut out = json!({
            "type": self.kind,
            "code": self.code,
            "message": self.message,
            "severity": self.severity,
            "retryable": self.retryable,
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        if let Some(map) = out.as_object_mut() {
            if let Some(details) = &self.details {
                map.insert("details".into(), Value::from(details.clone()));
            }
            if let Some(status) = self.http_status {
                map.insert("http_status".into(), Value::from(status));
            }
            if !self.context.is_empty() {
                let ctx = self.context.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                map.insert("context".into(), Value::Object(ctx));
            }
        }
        out
    }

    /// Emit this error through the `log` facade at its severity's level.
    pub fn log(&self) {
        log::log!(
            self.severity.log_level(),
            "{} [type={} retryable={} status={:?}]",
            self,
            self.kind,
            self.retryable,
            self.http_status
        );
    }
}

impl fmt::Display for CategorizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{}: {} ({})", self.message, details, self.code),
            None => write!(f, "{} ({})", self.message, self.code),
        }
    }
}

impl std::error::Error for CategorizedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_details_when_present() {
        let err = CategorizedError::validation("request", "bad request").with_details("missing title");
        assert_eq!(
            err.to_string(),
            "Validation failed for field 'request': bad request: missing title (VALIDATION_ERROR)"
        );
    }

    #[test]
    fn upstream_severity_follows_status() {
        assert_eq!(CategorizedError::upstream_api(503, "SERVER_ERROR", "x").severity(), Severity::High);
        assert_eq!(CategorizedError::upstream_api(418, "CLIENT_ERROR", "x").severity(), Severity::Medium);
    }

    #[test]
    fn json_rendering_uses_wire_names() {
        let v = CategorizedError::circuit_open("open").to_json();
        assert_eq!(v["type"], "circuit_breaker");
        assert_eq!(v["severity"], "high");
        assert_eq!(v["context"]["circuit_breaker_state"], "open");
        assert!(v.get("http_status").is_none());
    }

    #[test]
    fn source_is_exposed() {
        use std::error::Error as _;
        let io = std::io::Error::other("socket closed");
        let err = CategorizedError::network("GET /items/1").with_source(io);
        assert_eq!(err.source().map(ToString::to_string).as_deref(), Some("socket closed"));
    }
}
