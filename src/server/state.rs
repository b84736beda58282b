//! Application state container
//!
//! This module defines the shared application state that is passed
//! to all request handlers via Axum's state extraction.

use crate::config::Settings;
use crate::services::ConnectionManager;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
///
/// Cheap to clone; handlers only read from the connection manager.
#[derive(Clone)]
pub struct AppState {
    /// Application settings
    pub settings: Arc<Settings>,

    /// Owner of the Couchbase handle and the active credential lease
    pub connections: Arc<ConnectionManager>,

    /// Application start time (for uptime calculation)
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Arc<Settings>, connections: Arc<ConnectionManager>) -> Self {
        Self {
            settings,
            connections,
            start_time: Instant::now(),
        }
    }

    /// Get the application uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Service name reported by health checks
    pub fn service_name(&self) -> &str {
        &self.settings.app_name
    }
}
