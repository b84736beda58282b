//! Timeout utilities
//!
//! Bounds for the network calls made on behalf of health checks and the
//! rotation task, so that neither can hang on a stalled peer.

use std::time::Duration;

/// Timeout configuration for outbound calls
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutConfig {
    /// Bound for liveness pings and warm-up probes (default: 2s)
    pub probe_timeout: Duration,

    /// Bound for a single credential fetch from the secret manager (default: 10s)
    pub provider_timeout: Duration,

    /// Bound for a single cluster open attempt (default: 10s)
    pub connect_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(2),
            provider_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl TimeoutConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Apply timeout to an async operation
///
/// Returns `Err` with the original error type if the operation fails, or
/// [`TimeoutError::Timeout`] if it does not finish in time.
pub async fn with_timeout<T, E>(
    timeout: Duration,
    future: impl std::future::Future<Output = Result<T, E>>,
) -> Result<T, TimeoutError<E>> {
    match tokio::time::timeout(timeout, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TimeoutError::Inner(err)),
        Err(_) => Err(TimeoutError::Timeout(timeout)),
    }
}

/// Error type for timeout operations
#[derive(Debug, thiserror::Error)]
pub enum TimeoutError<E> {
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Inner(E),
}

impl<E> TimeoutError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TimeoutError::Timeout(_))
    }

    /// Get the inner error if not a timeout
    pub fn into_inner(self) -> Option<E> {
        match self {
            TimeoutError::Inner(e) => Some(e),
            TimeoutError::Timeout(_) => None,
        }
    }
}
