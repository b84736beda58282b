//! Request logging middleware
//!
//! Logs each request and its outcome with a trace ID for correlation.
//! Probe endpoints hit by orchestrators every few seconds are logged at
//! debug level unless they fail.

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use uuid::Uuid;

/// Header name for trace ID
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Header name for request ID (alias for trace ID)
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Paths polled by health checkers
const PROBE_PATHS: &[&str] = &["/health", "/liveness"];

/// Extension type for storing trace ID in request extensions
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new trace ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Middleware to log HTTP requests and responses
///
/// Reuses an incoming `x-trace-id` or `x-request-id`, otherwise generates
/// one, stores it in the request extensions and echoes it on the response
/// under both header names.
pub async fn log_request(mut request: Request, next: Next) -> Response<Body> {
    let start = Instant::now();

    let trace_id = extract_or_generate_trace_id(&request);
    request.extensions_mut().insert(trace_id.clone());

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let is_probe = PROBE_PATHS.contains(&path.as_str());

    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    if is_probe {
        tracing::debug!(trace_id = %trace_id, method = %method, path = %path, "Incoming probe");
    } else {
        tracing::info!(
            trace_id = %trace_id,
            method = %method,
            path = %path,
            user_agent = %user_agent.as_deref().unwrap_or("-"),
            "Incoming request"
        );
    }

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %method,
        path = %path,
    );

    let mut response = {
        let _guard = span.enter();
        next.run(request).await
    };

    let duration_ms = format!("{:.2}", start.elapsed().as_secs_f64() * 1000.0);
    let status = response.status();
    let lease = response
        .headers()
        .get(crate::middleware::LEASE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    if status.is_server_error() {
        tracing::error!(
            trace_id = %trace_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = %duration_ms,
            lease_remaining = %lease,
            "Server error"
        );
    } else if status.is_client_error() {
        tracing::warn!(
            trace_id = %trace_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = %duration_ms,
            "Client error"
        );
    } else if is_probe && status == StatusCode::OK {
        tracing::debug!(
            trace_id = %trace_id,
            path = %path,
            duration_ms = %duration_ms,
            "Probe completed"
        );
    } else {
        tracing::info!(
            trace_id = %trace_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = %duration_ms,
            lease_remaining = %lease,
            "Request completed"
        );
    }

    if let Ok(header_value) = HeaderValue::from_str(trace_id.as_str()) {
        response
            .headers_mut()
            .insert(TRACE_ID_HEADER, header_value.clone());
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER, header_value);
    }

    response
}

/// Extract trace ID from request headers or generate a new one
fn extract_or_generate_trace_id(request: &Request) -> TraceId {
    [TRACE_ID_HEADER, REQUEST_ID_HEADER]
        .iter()
        .find_map(|name| {
            request
                .headers()
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(|v| TraceId(v.to_string()))
        })
        .unwrap_or_default()
}
