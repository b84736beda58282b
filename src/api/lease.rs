//! Database credential lease diagnostics

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::server::state::AppState;
use crate::services::ConnectionManager;
use crate::utils::format::{format_date, format_ttl};

/// Remaining lifetime of the active credential lease
///
/// Every field is `null` when the credential does not expire or nothing is
/// connected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseInfo {
    pub expires_at: Option<String>,
    pub seconds_remaining: Option<u64>,
    pub human_readable: Option<String>,
}

impl LeaseInfo {
    pub fn from_manager(manager: &ConnectionManager) -> Self {
        Self::at(manager, Utc::now())
    }

    pub fn at(manager: &ConnectionManager, now: DateTime<Utc>) -> Self {
        let seconds_remaining = manager.seconds_remaining_at(now);
        Self {
            expires_at: manager.lease_expiry().map(format_date),
            seconds_remaining,
            human_readable: seconds_remaining.map(format_ttl),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsResponse {
    pub ok: bool,
    pub bucket: String,
    pub uptime_seconds: u64,
    #[serde(flatten)]
    pub lease: LeaseInfo,
}

/// GET /db/lease
pub async fn lease(State(state): State<AppState>) -> Json<LeaseInfo> {
    Json(LeaseInfo::from_manager(&state.connections))
}

/// Ping plus lease details. Always 200; `ok` carries the ping result.
///
/// GET /db/diagnostics
pub async fn diagnostics(State(state): State<AppState>) -> Json<DiagnosticsResponse> {
    let ok = state.connections.ping().await;

    Json(DiagnosticsResponse {
        ok,
        bucket: state.connections.bucket().to_string(),
        uptime_seconds: state.uptime_seconds(),
        lease: LeaseInfo::from_manager(&state.connections),
    })
}
