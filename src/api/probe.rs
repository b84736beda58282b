//! Single-document existence check against the active bucket

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::error::ApiError;
use crate::server::state::AppState;
use crate::services::cluster::ProbeResult;
use crate::utils::timeout::{with_timeout, TimeoutError};

/// Couchbase rejects document keys longer than this many bytes
const MAX_KEY_BYTES: usize = 250;

#[derive(Debug, Serialize)]
pub struct ProbeResponse {
    pub key: String,
    pub found: bool,
}

/// GET /db/probe/:key
pub async fn probe(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ProbeResponse>, ApiError> {
    if key.len() > MAX_KEY_BYTES {
        return Err(ApiError::InvalidRequest(format!(
            "document key exceeds {} bytes",
            MAX_KEY_BYTES
        )));
    }

    let handle = state.connections.handle()?;
    let timeout = state.settings.couchbase.timeouts().probe_timeout;

    let found = match with_timeout(timeout, handle.probe(&key)).await {
        Ok(ProbeResult::Found) => true,
        Ok(ProbeResult::NotFound) => false,
        Err(TimeoutError::Inner(e)) => return Err(e.into()),
        Err(e @ TimeoutError::Timeout(_)) => return Err(ApiError::Upstream(e.to_string())),
    };

    Ok(Json(ProbeResponse { key, found }))
}
