//! The seam to the HTTP layer: request descriptions going out, raw
//! upstream answers coming back.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `"{METHOD}:{path}"`, or `"{METHOD}:{path}:{params}"` when the request
/// carries query parameters.
pub fn cache_key(method: Method, path: &str, params: Option<&str>) -> String {
    match params {
        Some(p) if !p.is_empty() => format!("{method}:{path}:{p}"),
        _ => format!("{method}:{path}"),
    }
}

/// Read-through caching for a request. Its presence marks the request as a
/// read, whatever the method (searches are POSTs).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheDirective {
    pub key: String,
    pub ttl: Duration,
}

/// Cache entries to drop once a mutation succeeds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Invalidation {
    Key(String),
    Prefix(String),
    Containing(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub cache: Option<CacheDirective>,
    pub invalidate: Vec<Invalidation>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), body: None, cache: None, invalidate: Vec::new() }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serve from and populate the cache under `key`.
    #[must_use]
    pub fn cached(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.cache = Some(CacheDirective { key: key.into(), ttl });
        self
    }

    #[must_use]
    pub fn invalidating(mut self, invalidation: Invalidation) -> Self {
        self.invalidate.push(invalidation);
        self
    }

    /// Short label used in logs and error context, e.g. `GET /items/42`.
    pub fn operation(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// What the upstream answered. Any status code, success or not.
#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
}

impl UpstreamResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// The request never produced an HTTP answer.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport I/O error: {0}")]
    Io(String),
}

/// Sends one request to the upstream API.
///
/// Implementations perform exactly one attempt; retries, admission and
/// caching are layered on top by the orchestrator.
pub trait Transport: Send + Sync {
    fn send(&self, request: &ApiRequest) -> impl Future<Output = Result<UpstreamResponse, TransportError>> + Send;
}

impl<T: Transport> Transport for std::sync::Arc<T> {
    fn send(&self, request: &ApiRequest) -> impl Future<Output = Result<UpstreamResponse, TransportError>> + Send {
        (**self).send(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_includes_params_only_when_present() {
        assert_eq!(cache_key(Method::Get, "/items/1", None), "GET:/items/1");
        assert_eq!(cache_key(Method::Get, "/items", Some("")), "GET:/items");
        assert_eq!(cache_key(Method::Get, "/items", Some("limit=5")), "GET:/items:limit=5");
    }
}
