//! Credential-rotating connection manager
//!
//! [`ConnectionManager`] owns the process's single bucket handle. It opens
//! the handle with a credential, rides out the RBAC propagation lag of newly
//! issued credentials with jittered backoff, swaps handles when the
//! credential rotates, and answers liveness and lease queries for health
//! checks.
//!
//! Writers (connect, reconnect, close) are serialized by an async mutex.
//! Readers load an immutable snapshot and never wait on that mutex, so a
//! health check stays fast while a reconnect is sitting in its retry loop.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::cluster::{ClusterDriver, DriverError, ProbeResult, SharedHandle};
use super::credentials::{Credential, CredentialStore};
use crate::config::CouchbaseConfig;
use crate::utils::retry::BackoffPolicy;
use crate::utils::timeout::{with_timeout, TimeoutError};

/// Key read after every successful open. It is not expected to exist.
pub const PROBE_KEY: &str = "_ping_";

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced by connect operations and handle lookups
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Couchbase configuration missing: {0}")]
    Configuration(String),

    #[error("credential still not authorized after {attempts} attempts: {source}")]
    AuthorizationExhausted {
        attempts: u32,
        #[source]
        source: DriverError,
    },

    #[error("connect failed: {0}")]
    Driver(#[from] DriverError),

    #[error("connect cancelled")]
    Cancelled,

    #[error("Couchbase bucket not opened")]
    NotConnected,
}

/// What `reconnect_if_changed` did
#[derive(Debug)]
pub enum ReconnectOutcome {
    /// The proposed credential is the active one; nothing was opened
    Unchanged,
    /// A new handle was opened and committed
    Reconnected(SharedHandle),
}

impl ReconnectOutcome {
    pub fn is_reconnected(&self) -> bool {
        matches!(self, ReconnectOutcome::Reconnected(_))
    }
}

// ============================================================================
// Connection Manager
// ============================================================================

/// Owner of the active bucket handle and the credential it authenticated with
pub struct ConnectionManager {
    driver: Arc<dyn ClusterDriver>,
    connection_string: String,
    bucket: String,
    policy: BackoffPolicy,
    probe_timeout: Duration,
    store: CredentialStore<SharedHandle>,
    connect_lock: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(driver: Arc<dyn ClusterDriver>, config: &CouchbaseConfig) -> Self {
        Self {
            driver,
            connection_string: config.connection_string.trim().to_string(),
            bucket: config.bucket.trim().to_string(),
            policy: config.backoff_policy(),
            probe_timeout: config.timeouts().probe_timeout,
            store: CredentialStore::new(),
            connect_lock: Mutex::new(()),
        }
    }

    /// Override the retry policy
    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the bound on pings and warm-up probes
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    // ------------------------------------------------------------------------
    // Writers
    // ------------------------------------------------------------------------

    /// Force a connect with `credential`, closing any open handle first.
    ///
    /// Used at startup. On failure the manager is left disconnected.
    pub async fn connect_with(&self, credential: Credential) -> Result<SharedHandle, ConnectError> {
        self.connect_with_cancel(credential, &CancellationToken::new())
            .await
    }

    /// [`connect_with`](Self::connect_with) that stops retrying once `cancel` fires
    pub async fn connect_with_cancel(
        &self,
        credential: Credential,
        cancel: &CancellationToken,
    ) -> Result<SharedHandle, ConnectError> {
        self.ensure_config()?;
        let _guard = self.connect_lock.lock().await;

        let previous = self.store.clear();
        if let Some(handle) = previous.handle() {
            close_quietly(handle, "replaced by forced connect").await;
        }

        let handle = self.open_with_retry(&credential, cancel).await?;
        self.store.commit(credential, handle.clone());
        self.log_lease();
        Ok(handle)
    }

    /// Reconnect only if `credential` differs from the active one.
    ///
    /// The current handle keeps serving until the new one is open. If the
    /// new credential cannot connect, the previous handle and credential stay
    /// active and the error is returned.
    pub async fn reconnect_if_changed(
        &self,
        credential: Credential,
    ) -> Result<ReconnectOutcome, ConnectError> {
        self.reconnect_if_changed_with_cancel(credential, &CancellationToken::new())
            .await
    }

    /// [`reconnect_if_changed`](Self::reconnect_if_changed) that stops retrying once `cancel` fires
    pub async fn reconnect_if_changed_with_cancel(
        &self,
        credential: Credential,
        cancel: &CancellationToken,
    ) -> Result<ReconnectOutcome, ConnectError> {
        if !self.store.should_reconnect(&credential) {
            tracing::trace!(user = %credential.username(), "Credential unchanged, keeping connection");
            return Ok(ReconnectOutcome::Unchanged);
        }

        self.ensure_config()?;
        let _guard = self.connect_lock.lock().await;

        // Another caller may have committed the same credential while we waited
        if !self.store.should_reconnect(&credential) {
            tracing::trace!(user = %credential.username(), "Credential committed concurrently");
            return Ok(ReconnectOutcome::Unchanged);
        }

        let handle = self.open_with_retry(&credential, cancel).await?;
        let previous = self.store.commit(credential, handle.clone());
        if let Some(old) = previous.handle() {
            close_quietly(old, "rotated out").await;
        }
        self.log_lease();
        Ok(ReconnectOutcome::Reconnected(handle))
    }

    /// Close the active handle and forget the credential. Idempotent.
    pub async fn close(&self) {
        let _guard = self.connect_lock.lock().await;

        let previous = self.store.clear();
        match previous.handle() {
            Some(handle) => {
                close_quietly(handle, "shutdown").await;
                tracing::info!(bucket = %self.bucket, "Couchbase connection closed");
            }
            None => tracing::debug!("Close requested with no open connection"),
        }
    }

    fn ensure_config(&self) -> Result<(), ConnectError> {
        let mut missing = Vec::new();
        if self.connection_string.is_empty() {
            missing.push("COUCHBASE_CONNSTR");
        }
        if self.bucket.is_empty() {
            missing.push("COUCHBASE_BUCKET");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConnectError::Configuration(missing.join(" or ")))
        }
    }

    /// Open the bucket, retrying only authorization failures.
    ///
    /// Sleeps one jittered base delay before the first attempt, since a
    /// credential minted moments ago is almost never usable yet.
    async fn open_with_retry(
        &self,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<SharedHandle, ConnectError> {
        let max_attempts = self.policy.max_attempts.max(1);

        tracing::info!(
            user = %credential.username(),
            bucket = %self.bucket,
            lease_seconds = credential.lease_duration().map(|d| d.as_secs()).unwrap_or(0),
            "Connecting to Couchbase with dynamic credentials"
        );

        let mut delay = self.policy.next_delay(None);
        pause(self.policy.jittered(delay), cancel).await?;

        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ConnectError::Cancelled);
            }
            attempt += 1;

            let err = match self
                .driver
                .open(&self.connection_string, &self.bucket, credential)
                .await
            {
                Ok(handle) => {
                    self.warm_up(&handle).await;
                    tracing::info!(
                        user = %credential.username(),
                        bucket = %self.bucket,
                        attempts = attempt,
                        "Connected to Couchbase"
                    );
                    return Ok(handle);
                }
                Err(err) => err,
            };

            if !err.is_authorization() {
                tracing::warn!(error = %err, attempt, "Couchbase connect failed, not retrying");
                return Err(ConnectError::Driver(err));
            }

            if attempt >= max_attempts {
                tracing::warn!(
                    error = %err,
                    attempts = attempt,
                    "Couchbase still rejecting credential, giving up"
                );
                return Err(ConnectError::AuthorizationExhausted {
                    attempts: attempt,
                    source: err,
                });
            }

            if attempt == 1 {
                tracing::warn!("Couchbase auth not ready yet, retrying shortly");
            } else {
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Couchbase auth not ready yet, retrying"
                );
            }

            pause(self.policy.jittered(delay), cancel).await?;
            delay = self.policy.next_delay(Some(delay));
        }
    }

    /// Point-read the sentinel key; a miss proves the auth path works
    async fn warm_up(&self, handle: &SharedHandle) {
        match with_timeout(self.probe_timeout, handle.probe(PROBE_KEY)).await {
            Ok(ProbeResult::NotFound) | Ok(ProbeResult::Found) => {
                tracing::debug!(key = PROBE_KEY, "Warm-up probe completed");
            }
            Err(e) => {
                tracing::warn!(key = PROBE_KEY, error = %e, "Warm-up probe failed, continuing");
            }
        }
    }

    fn log_lease(&self) {
        if let Some(expiry) = self.lease_expiry() {
            tracing::info!(
                expires_at = %crate::utils::format::format_date(expiry),
                seconds_remaining = self.seconds_remaining().unwrap_or(0),
                "Database credential lease recorded"
            );
        }
    }

    // ------------------------------------------------------------------------
    // Readers
    // ------------------------------------------------------------------------

    /// The live handle, or [`ConnectError::NotConnected`]
    pub fn handle(&self) -> Result<SharedHandle, ConnectError> {
        self.store
            .snapshot()
            .handle()
            .cloned()
            .ok_or(ConnectError::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.store.snapshot().is_connected()
    }

    /// Liveness of the active handle. Never fails; errors read as `false`.
    ///
    /// A handle rotated out between the snapshot and the ping reports
    /// [`DriverError::Closed`]; the ping is then repeated once on the handle
    /// that replaced it.
    pub async fn ping(&self) -> bool {
        let Some(handle) = self.store.snapshot().handle().cloned() else {
            return false;
        };

        match self.ping_handle(&handle).await {
            Err(TimeoutError::Inner(DriverError::Closed)) => {
                match self.store.snapshot().handle().cloned() {
                    Some(next) if !is_same_handle(&next, &handle) => {
                        tracing::debug!("Pinged a rotated-out handle, retrying on its replacement");
                        self.ping_handle(&next).await.is_ok()
                    }
                    _ => false,
                }
            }
            result => result.is_ok(),
        }
    }

    async fn ping_handle(&self, handle: &SharedHandle) -> Result<(), TimeoutError<DriverError>> {
        let result = with_timeout(self.probe_timeout, handle.ping()).await;
        if let Err(e) = &result {
            tracing::debug!(error = %e, "Couchbase ping failed");
        }
        result
    }

    /// Whether `credential` differs from the one in use
    pub fn should_reconnect(&self, credential: &Credential) -> bool {
        self.store.should_reconnect(credential)
    }

    pub fn active_credential(&self) -> Option<Credential> {
        self.store.snapshot().credential().cloned()
    }

    /// Absolute expiry of the active lease, if it has one
    pub fn lease_expiry(&self) -> Option<DateTime<Utc>> {
        self.store.lease_expiry()
    }

    /// Whole seconds left on the active lease, floored at zero
    pub fn seconds_remaining(&self) -> Option<u64> {
        self.seconds_remaining_at(Utc::now())
    }

    pub fn seconds_remaining_at(&self, now: DateTime<Utc>) -> Option<u64> {
        self.store.seconds_remaining_at(now)
    }
}

async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<(), ConnectError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ConnectError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

fn is_same_handle(a: &SharedHandle, b: &SharedHandle) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

async fn close_quietly(handle: &SharedHandle, reason: &str) {
    if let Err(e) = handle.close().await {
        tracing::warn!(bucket = %handle.bucket(), reason, error = %e, "Failed to close Couchbase handle");
    } else {
        tracing::debug!(bucket = %handle.bucket(), reason, "Closed Couchbase handle");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cluster::fake::{same_handle, FakeDriver};
    use crate::utils::retry::presets;

    fn config() -> CouchbaseConfig {
        CouchbaseConfig {
            connection_string: "couchbase://couchbase".into(),
            bucket: "library".into(),
            ..CouchbaseConfig::default()
        }
    }

    fn manager(driver: &Arc<FakeDriver>) -> ConnectionManager {
        ConnectionManager::new(driver.clone(), &config()).with_policy(presets::immediate(5))
    }

    fn cred(user: &str, pass: &str, ttl: u64) -> Credential {
        Credential::new(user, pass).with_lease_duration(Duration::from_secs(ttl))
    }

    fn unauthorized() -> DriverError {
        DriverError::Unauthorized("401 Unauthorized".into())
    }

    #[tokio::test]
    async fn test_handle_before_connect_is_not_connected() {
        let driver = FakeDriver::new();
        let manager = manager(&driver);

        assert!(matches!(manager.handle(), Err(ConnectError::NotConnected)));
        assert!(!manager.ping().await);
        assert_eq!(manager.lease_expiry(), None);
        assert_eq!(manager.seconds_remaining(), None);
    }

    #[tokio::test]
    async fn test_connect_with_opens_and_probes() {
        let driver = FakeDriver::new();
        let manager = manager(&driver);

        let handle = manager.connect_with(cred("a", "x", 60)).await.unwrap();
        assert_eq!(handle.bucket(), "library");
        assert_eq!(driver.opens(), 1);
        assert_eq!(driver.handle(0).probes(), 1);
        assert!(same_handle(&manager.handle().unwrap(), &driver.handle(0)));
        assert!(manager.ping().await);
    }

    #[tokio::test]
    async fn test_missing_configuration_fails_without_opening() {
        let driver = FakeDriver::new();
        let manager = ConnectionManager::new(driver.clone(), &CouchbaseConfig::default())
            .with_policy(presets::immediate(5));

        let err = manager.connect_with(cred("a", "x", 60)).await.unwrap_err();
        match err {
            ConnectError::Configuration(msg) => {
                assert!(msg.contains("COUCHBASE_CONNSTR"));
                assert!(msg.contains("COUCHBASE_BUCKET"));
            }
            other => panic!("expected configuration error, got {:?}", other),
        }
        assert_eq!(driver.opens(), 0);
    }

    #[tokio::test]
    async fn test_retries_authorization_until_success() {
        let driver = FakeDriver::new();
        driver.fail_next(unauthorized());
        driver.fail_next(DriverError::Unexpected {
            status: 500,
            message: "Authentication failure".into(),
        });
        let manager = manager(&driver);

        manager.connect_with(cred("a", "x", 60)).await.unwrap();
        assert_eq!(driver.opens(), 3);
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_retry_ceiling_is_exact() {
        let driver = FakeDriver::new();
        driver.fail_always(Some(unauthorized()));
        let manager = manager(&driver);

        let err = manager.connect_with(cred("a", "x", 60)).await.unwrap_err();
        match err {
            ConnectError::AuthorizationExhausted { attempts, source } => {
                assert_eq!(attempts, 5);
                assert_eq!(source, unauthorized());
            }
            other => panic!("expected exhausted error, got {:?}", other),
        }
        assert_eq!(driver.opens(), 5);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_non_authorization_error_is_not_retried() {
        let driver = FakeDriver::new();
        driver.fail_always(Some(DriverError::BucketNotFound("library".into())));
        let manager = manager(&driver);

        let err = manager.connect_with(cred("a", "x", 60)).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectError::Driver(DriverError::BucketNotFound(_))
        ));
        assert_eq!(driver.opens(), 1);
    }

    #[tokio::test]
    async fn test_missing_bucket_named_like_auth_is_not_retried() {
        let driver = FakeDriver::new();
        driver.fail_always(Some(DriverError::BucketNotFound("authors".into())));
        let manager = ConnectionManager::new(driver.clone(), &config())
            .with_policy(presets::immediate(10));

        let err = manager.connect_with(cred("a", "x", 60)).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectError::Driver(DriverError::BucketNotFound(ref bucket)) if bucket == "authors"
        ));
        assert_eq!(driver.opens(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_auth_host_is_not_retried() {
        let driver = FakeDriver::new();
        driver.fail_always(Some(DriverError::Unreachable(
            "error sending request for url (http://auth-db:8091/pools/default)".into(),
        )));
        let manager = manager(&driver);

        let err = manager.connect_with(cred("a", "x", 60)).await.unwrap_err();
        assert!(matches!(err, ConnectError::Driver(DriverError::Unreachable(_))));
        assert_eq!(driver.opens(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_if_changed_is_idempotent() {
        let driver = FakeDriver::new();
        let manager = manager(&driver);

        let first = manager.reconnect_if_changed(cred("a", "x", 60)).await.unwrap();
        assert!(first.is_reconnected());
        let second = manager.reconnect_if_changed(cred("a", "x", 60)).await.unwrap();
        assert!(!second.is_reconnected());
        let padded = manager.reconnect_if_changed(cred(" a", "x ", 60)).await.unwrap();
        assert!(!padded.is_reconnected());

        assert_eq!(driver.opens(), 1);
    }

    #[tokio::test]
    async fn test_password_change_triggers_exactly_one_reconnect() {
        let driver = FakeDriver::new();
        let manager = manager(&driver);
        manager.connect_with(cred("a", "x", 60)).await.unwrap();

        let outcome = manager.reconnect_if_changed(cred("a", "y", 60)).await.unwrap();
        assert!(outcome.is_reconnected());
        assert_eq!(driver.opens(), 2);

        // The rotated-out handle is closed, the new one serves
        assert!(driver.handle(0).is_closed());
        assert!(!driver.handle(1).is_closed());
        assert!(same_handle(&manager.handle().unwrap(), &driver.handle(1)));
    }

    #[tokio::test]
    async fn test_failed_rotation_preserves_service() {
        let driver = FakeDriver::new();
        let manager = manager(&driver);
        manager.connect_with(cred("a", "x", 60)).await.unwrap();

        driver.reject_user("b");
        let err = manager.reconnect_if_changed(cred("b", "y", 60)).await.unwrap_err();
        assert!(matches!(err, ConnectError::AuthorizationExhausted { attempts: 5, .. }));

        let handle = manager.handle().unwrap();
        assert!(same_handle(&handle, &driver.handle(0)));
        assert!(!driver.handle(0).is_closed());
        assert!(manager.ping().await);

        // The failed credential was never committed
        assert_eq!(manager.active_credential().unwrap().username(), "a");
        assert!(!manager.should_reconnect(&cred("a", "x", 60)));
        assert!(manager.should_reconnect(&cred("b", "y", 60)));
    }

    #[tokio::test]
    async fn test_failed_forced_connect_leaves_manager_disconnected() {
        let driver = FakeDriver::new();
        let manager = manager(&driver);
        manager.connect_with(cred("a", "x", 60)).await.unwrap();

        driver.fail_always(Some(DriverError::Unreachable("connection refused".into())));
        assert!(manager.connect_with(cred("b", "y", 60)).await.is_err());

        assert!(driver.handle(0).is_closed());
        assert!(matches!(manager.handle(), Err(ConnectError::NotConnected)));
        assert_eq!(manager.lease_expiry(), None);
    }

    #[tokio::test]
    async fn test_connect_with_replaces_existing_handle() {
        let driver = FakeDriver::new();
        let manager = manager(&driver);

        manager.connect_with(cred("a", "x", 60)).await.unwrap();
        manager.connect_with(cred("a", "x", 60)).await.unwrap();

        assert_eq!(driver.opens(), 2);
        assert!(driver.handle(0).is_closed());
        assert!(same_handle(&manager.handle().unwrap(), &driver.handle(1)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let driver = FakeDriver::new();
        let manager = manager(&driver);
        manager.connect_with(cred("a", "x", 60)).await.unwrap();

        manager.close().await;
        manager.close().await;

        assert!(driver.handle(0).is_closed());
        assert!(matches!(manager.handle(), Err(ConnectError::NotConnected)));
        assert_eq!(manager.lease_expiry(), None);
        assert!(manager.active_credential().is_none());
    }

    #[tokio::test]
    async fn test_ping_reports_unhealthy_handle() {
        let driver = FakeDriver::new();
        let manager = manager(&driver);
        manager.connect_with(cred("a", "x", 60)).await.unwrap();

        driver.handle(0).set_healthy(false);
        assert!(!manager.ping().await);
    }

    #[tokio::test]
    async fn test_ping_during_rotation_follows_new_handle() {
        let driver = FakeDriver::new();
        let manager = Arc::new(manager(&driver));
        manager.connect_with(cred("a", "x", 60)).await.unwrap();
        driver.handle(0).set_ping_delay(Duration::from_millis(50));

        // The ping snapshots handle 0, then the rotation closes it mid-flight
        let ping = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ping().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.reconnect_if_changed(cred("b", "y", 60)).await.unwrap();
        assert!(driver.handle(0).is_closed());

        assert!(ping.await.unwrap());
    }

    #[tokio::test]
    async fn test_ping_on_closed_handle_without_replacement_fails() {
        let driver = FakeDriver::new();
        let manager = Arc::new(manager(&driver));
        manager.connect_with(cred("a", "x", 60)).await.unwrap();
        driver.handle(0).set_ping_delay(Duration::from_millis(50));

        let ping = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ping().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.close().await;

        assert!(!ping.await.unwrap());
    }

    #[tokio::test]
    async fn test_static_credential_has_no_lease() {
        let driver = FakeDriver::new();
        let manager = manager(&driver);
        manager.connect_with(Credential::new("Administrator", "password")).await.unwrap();

        assert!(manager.is_connected());
        assert_eq!(manager.lease_expiry(), None);
        assert_eq!(manager.seconds_remaining(), None);
    }

    #[tokio::test]
    async fn test_concurrent_connects_never_overlap() {
        let driver = FakeDriver::new();
        driver.set_open_delay(Duration::from_millis(20));
        let manager = Arc::new(manager(&driver));

        let a = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect_with(cred("a", "x", 60)).await })
        };
        let b = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.reconnect_if_changed(cred("b", "y", 60)).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(driver.max_in_flight(), 1);
        // Exactly one handle survives, every other one was closed
        let open: Vec<_> = (0..driver.handle_count())
            .map(|i| driver.handle(i))
            .filter(|h| !h.is_closed())
            .collect();
        assert_eq!(open.len(), 1);
        assert!(same_handle(&manager.handle().unwrap(), &open[0]));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_opens_nothing() {
        let driver = FakeDriver::new();
        let manager = manager(&driver).with_policy(
            presets::immediate(5).with_base_delay(Duration::from_millis(50)),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = manager
            .reconnect_if_changed_with_cancel(cred("a", "x", 60), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Cancelled));
        assert_eq!(driver.opens(), 0);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_cancel_stops_retry_loop() {
        let driver = FakeDriver::new();
        driver.fail_always(Some(unauthorized()));
        let manager = manager(&driver).with_policy(
            BackoffPolicy::new()
                .with_max_attempts(1000)
                .with_base_delay(Duration::from_millis(5))
                .with_max_delay(Duration::from_millis(5))
                .with_jitter(Duration::ZERO),
        );
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                cancel.cancel();
            })
        };

        let err = manager
            .connect_with_cancel(cred("a", "x", 60), &cancel)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, ConnectError::Cancelled));
        assert!(driver.opens() < 1000);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_end_to_end_rotation_scenario() {
        let driver = FakeDriver::new();
        let manager = manager(&driver);
        assert!(!manager.is_connected());

        manager.connect_with(cred("a", "x", 60)).await.unwrap();
        let remaining = manager.seconds_remaining().unwrap();
        assert!((59..=60).contains(&remaining), "remaining = {}", remaining);
        let first_expiry = manager.lease_expiry().unwrap();

        let outcome = manager.reconnect_if_changed(cred("a", "x", 60)).await.unwrap();
        assert!(!outcome.is_reconnected());
        assert_eq!(driver.opens(), 1);
        assert_eq!(manager.lease_expiry(), Some(first_expiry));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let outcome = manager.reconnect_if_changed(cred("b", "y", 60)).await.unwrap();
        assert!(outcome.is_reconnected());
        assert_eq!(driver.opens(), 2);
        assert_eq!(driver.handle(1).username(), "b");

        let second_expiry = manager.lease_expiry().unwrap();
        assert!(second_expiry > first_expiry);
        let remaining = manager.seconds_remaining().unwrap();
        assert!((59..=60).contains(&remaining), "remaining = {}", remaining);
    }
}
