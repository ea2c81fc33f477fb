//! Turns a transport outcome into a [`CategorizedError`].

use crate::errors::{CategorizedError, ErrorKind, Severity};
use crate::transport::{ApiRequest, TransportError, UpstreamResponse};
use serde_json::Value;
use std::time::Duration;

/// `None` for a 2xx answer, otherwise exactly one categorized error.
pub fn classify(
    request: &ApiRequest,
    outcome: &Result<UpstreamResponse, TransportError>,
) -> Option<CategorizedError> {
    let err = match outcome {
        Ok(resp) if resp.is_success() => return None,
        Ok(resp) => classify_status(resp.status, &resp.body),
        Err(e) => classify_transport(&request.operation(), e),
    };
    Some(
        err.with_context("method", request.method.as_str())
            .with_context("path", request.path.as_str()),
    )
}

/// Maps a non-2xx status to its error kind.
pub fn classify_status(status: u16, body: &Value) -> CategorizedError {
    let upstream_message = body_message(body);
    let err = match status {
        400 => CategorizedError::validation("request", "bad request").with_details(body_text(body)),
        401 => CategorizedError::authentication("invalid API key or expired token"),
        403 => CategorizedError::authorization("requested resource"),
        404 => CategorizedError::not_found("resource", "unknown"),
        409 => CategorizedError::conflict("resource", "conflict detected"),
        429 => CategorizedError::rate_limit(Duration::from_secs(60)),
        408 => CategorizedError::timeout("http_request", Duration::ZERO),
        s if s >= 500 => CategorizedError::upstream_api(s, "SERVER_ERROR", "server error")
            .with_severity(Severity::High),
        s => CategorizedError::new(ErrorKind::Internal, "UNEXPECTED_STATUS", "unexpected upstream status")
            .with_http_status(s)
            .with_severity(Severity::Medium),
    };
    match upstream_message {
        Some(msg) if status != 400 => err.with_details(msg),
        _ => err,
    }
}

pub fn classify_transport(operation: &str, err: &TransportError) -> CategorizedError {
    match err {
        TransportError::Timeout(after) => CategorizedError::timeout(operation, *after),
        TransportError::Connect(_) | TransportError::Io(_) => {
            CategorizedError::network(operation).with_source(err.clone())
        }
    }
}

fn body_message(body: &Value) -> Option<String> {
    body.get("message").and_then(Value::as_str).map(str::to_owned)
}

fn body_text(body: &Value) -> String {
    match body {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upstream_message_becomes_details() {
        let err = classify_status(404, &json!({"message": "item 7 is gone"}));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.details(), Some("item 7 is gone"));
    }

    #[test]
    fn redirect_is_internal_with_status() {
        let err = classify_status(302, &Value::Null);
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.http_status(), Some(302));
    }
}
