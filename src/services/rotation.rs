//! Background credential rotation
//!
//! A [`RotationDriver`] periodically asks the credential provider for the
//! current credential and hands it to the connection manager, which only
//! reconnects when it actually changed. Wake-ups track the active lease: a
//! leased credential is refreshed part way through its lifetime, a
//! non-expiring one is polled on a slow fixed interval.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::connection::{ConnectError, ConnectionManager, ReconnectOutcome};
use super::provider::CredentialProvider;
use crate::config::RotationConfig;
use crate::utils::format::{format_date, format_ttl};
use crate::utils::timeout::with_timeout;

/// Result of a single rotation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Provider returned the credential already in use
    Unchanged,
    /// A new credential was connected and committed
    Rotated,
    /// The provider could not be reached or returned garbage
    ProviderFailed,
    /// The new credential never connected; the old connection keeps serving
    ReconnectFailed,
    /// Shutdown interrupted the pass
    Cancelled,
}

impl TickOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TickOutcome::ProviderFailed | TickOutcome::ReconnectFailed)
    }
}

/// Delay until the next pass after a successful one
pub fn next_wake(lease: Option<Duration>, config: &RotationConfig) -> Duration {
    match lease {
        Some(lease) => lease
            .mul_f64(config.lease_fraction)
            .max(Duration::from_secs(config.min_interval_seconds)),
        None => Duration::from_secs(config.static_poll_seconds),
    }
}

/// Delay until the next pass after a failed one, never later than the lease-based wake
pub fn retry_wake(lease: Option<Duration>, config: &RotationConfig) -> Duration {
    Duration::from_secs(config.retry_seconds).min(next_wake(lease, config))
}

// ============================================================================
// Driver
// ============================================================================

pub struct RotationDriver {
    provider: Arc<dyn CredentialProvider>,
    manager: Arc<ConnectionManager>,
    role: String,
    config: RotationConfig,
    fetch_timeout: Duration,
}

impl RotationDriver {
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        manager: Arc<ConnectionManager>,
        role: impl Into<String>,
        config: RotationConfig,
    ) -> Self {
        Self {
            provider,
            manager,
            role: role.into(),
            config,
            fetch_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Fetch the current credential and reconnect if it changed
    pub async fn tick(&self, cancel: &CancellationToken) -> TickOutcome {
        let credential = match with_timeout(self.fetch_timeout, self.provider.fetch(&self.role)).await
        {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!(
                    provider = %self.provider.name(),
                    role = %self.role,
                    error = %e,
                    "Failed to fetch database credential, keeping current connection"
                );
                return TickOutcome::ProviderFailed;
            }
        };

        match self
            .manager
            .reconnect_if_changed_with_cancel(credential, cancel)
            .await
        {
            Ok(ReconnectOutcome::Unchanged) => TickOutcome::Unchanged,
            Ok(ReconnectOutcome::Reconnected(_)) => {
                match (self.manager.lease_expiry(), self.manager.seconds_remaining()) {
                    (Some(expiry), Some(ttl)) => tracing::info!(
                        role = %self.role,
                        "Database credential rotated, renew in ~{} (at {})",
                        format_ttl(ttl),
                        format_date(expiry)
                    ),
                    _ => tracing::info!(role = %self.role, "Database credential rotated"),
                }
                TickOutcome::Rotated
            }
            Err(ConnectError::Cancelled) => TickOutcome::Cancelled,
            Err(e) => {
                tracing::error!(
                    role = %self.role,
                    error = %e,
                    "Credential rotation failed, keeping current connection"
                );
                TickOutcome::ReconnectFailed
            }
        }
    }

    fn active_lease(&self) -> Option<Duration> {
        self.manager
            .active_credential()
            .and_then(|c| c.lease_duration())
    }

    /// Delay before the first pass; immediate when nothing is connected yet
    fn initial_wait(&self) -> Duration {
        if !self.manager.is_connected() {
            return Duration::ZERO;
        }
        next_wake(self.active_lease(), &self.config)
    }

    fn wait_after(&self, outcome: TickOutcome) -> Duration {
        if outcome.is_failure() {
            retry_wake(self.active_lease(), &self.config)
        } else {
            next_wake(self.active_lease(), &self.config)
        }
    }

    /// Run until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let mut wait = self.initial_wait();
        tracing::info!(
            role = %self.role,
            provider = %self.provider.name(),
            first_check_secs = wait.as_secs(),
            "Credential rotation started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            let outcome = self.tick(&cancel).await;
            if outcome == TickOutcome::Cancelled || cancel.is_cancelled() {
                break;
            }

            wait = self.wait_after(outcome);
            tracing::debug!(?outcome, next_check_secs = wait.as_secs(), "Rotation pass complete");
        }

        tracing::info!(role = %self.role, "Credential rotation stopped");
    }

    /// Run on a background task
    pub fn spawn(self) -> RotationHandle {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(self.run(cancel.clone()));
        RotationHandle { cancel, join }
    }
}

/// Handle to a spawned rotation task
pub struct RotationHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl RotationHandle {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the task and wait for it to finish its current step
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "Rotation task ended abnormally");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
