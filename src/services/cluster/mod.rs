//! Backend cluster driver abstraction
//!
//! The connection manager talks to the database only through these traits:
//! a [`ClusterDriver`] opens a bucket with a credential and hands back a
//! [`ClusterHandle`] that can be probed, pinged and closed.

mod http;

#[cfg(test)]
pub(crate) mod fake;

pub use http::{HttpClusterDriver, HttpClusterHandle};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use super::credentials::Credential;

// ============================================================================
// Errors
// ============================================================================

/// Errors reported by a cluster driver
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("authentication failure: {0}")]
    Unauthorized(String),

    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("cluster unreachable: {0}")]
    Unreachable(String),

    #[error("invalid connection target: {0}")]
    InvalidTarget(String),

    #[error("handle already closed")]
    Closed,

    #[error("unexpected cluster response: {status} - {message}")]
    Unexpected { status: u16, message: String },
}

impl DriverError {
    /// Whether this failure means "credential not recognized (yet)".
    ///
    /// Besides the explicit variant, an unexpected server response whose
    /// own message mentions authentication counts. Payloads of the other
    /// variants carry caller data (bucket names, hosts, URLs) and are never
    /// inspected.
    pub fn is_authorization(&self) -> bool {
        match self {
            DriverError::Unauthorized(_) => true,
            DriverError::Unexpected { message, .. } => message.to_lowercase().contains("auth"),
            DriverError::BucketNotFound(_)
            | DriverError::Unreachable(_)
            | DriverError::InvalidTarget(_)
            | DriverError::Closed => false,
        }
    }
}

// ============================================================================
// Probe
// ============================================================================

/// Outcome of a point read used as a warm-up probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    Found,
    NotFound,
}

// ============================================================================
// Traits
// ============================================================================

/// An open, authenticated bucket
#[async_trait]
pub trait ClusterHandle: Send + Sync + std::fmt::Debug {
    /// Name of the bucket this handle is bound to
    fn bucket(&self) -> &str;

    /// Read `key`, reporting only whether it exists
    async fn probe(&self, key: &str) -> Result<ProbeResult, DriverError>;

    /// Cheap authenticated round-trip to the cluster
    async fn ping(&self) -> Result<(), DriverError>;

    /// Release the handle. Later calls on it fail with [`DriverError::Closed`].
    async fn close(&self) -> Result<(), DriverError>;
}

/// Shared handle type handed out by the connection manager
pub type SharedHandle = Arc<dyn ClusterHandle>;

/// Factory for [`ClusterHandle`]s
#[async_trait]
pub trait ClusterDriver: Send + Sync {
    async fn open(
        &self,
        target: &str,
        bucket: &str,
        credential: &Credential,
    ) -> Result<SharedHandle, DriverError>;
}
