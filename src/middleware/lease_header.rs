//! Lease TTL response header
//!
//! Annotates every response with the time left on the active database
//! credential lease, formatted `H:MM:SS`. Omitted when the credential does
//! not expire or nothing is connected.

use axum::{
    body::Body,
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::services::ConnectionManager;
use crate::utils::format::format_ttl;

/// Header carrying the remaining lease
pub const LEASE_HEADER: &str = "x-db-creds-expires-in";

pub async fn lease_header(
    State(connections): State<Arc<ConnectionManager>>,
    request: Request,
    next: Next,
) -> Response<Body> {
    let remaining = connections.seconds_remaining();

    let mut response = next.run(request).await;
    if let Some(value) = remaining.and_then(|ttl| HeaderValue::from_str(&format_ttl(ttl)).ok()) {
        response.headers_mut().insert(LEASE_HEADER, value);
    }
    response
}
