//! Health check endpoints
//!
//! This module provides health check endpoints for monitoring
//! and container orchestration (Kubernetes, ECS, etc.)

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::server::state::AppState;

/// Response for the main health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
}

/// Response for liveness probe
#[derive(Serialize)]
pub struct LivenessResponse {
    pub alive: bool,
}

/// Main health check endpoint
///
/// Pings the active Couchbase handle. Returns 503 when the ping fails or no
/// handle is open, so load balancers drain the instance while the database
/// is unreachable.
///
/// GET /health
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let ok = state.connections.ping().await;

    let status = if ok {
        StatusCode::OK
    } else {
        tracing::warn!(bucket = %state.connections.bucket(), "Health check failed: database ping unsuccessful");
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            ok,
            service: state.service_name().to_string(),
        }),
    )
}

/// Liveness probe endpoint
///
/// Returns whether the process is alive and should not be restarted.
/// Does not touch the database.
///
/// GET /liveness
pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { alive: true })
}
