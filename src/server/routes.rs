//! Application routing
//!
//! This module defines all HTTP routes for the application.

use axum::{http::HeaderName, middleware, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{health, lease, probe};
use crate::middleware::{
    lease_header::{lease_header, LEASE_HEADER},
    logging::{log_request, REQUEST_ID_HEADER, TRACE_ID_HEADER},
};
use crate::server::state::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/liveness", get(health::liveness));

    let db_routes = Router::new()
        .route("/lease", get(lease::lease))
        .route("/diagnostics", get(lease::diagnostics))
        .route("/probe/:key", get(probe::probe));

    // Layer order: last added = outermost = runs first
    Router::new()
        .merge(health_routes)
        .nest("/db", db_routes)
        .layer(middleware::from_fn_with_state(
            state.connections.clone(),
            lease_header,
        ))
        .layer(create_cors_layer())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Create CORS layer with permissive settings
fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            HeaderName::from_static(TRACE_ID_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderName::from_static(LEASE_HEADER),
        ])
}
