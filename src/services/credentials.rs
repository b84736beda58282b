//! Database credentials and the active connection state
//!
//! A [`Credential`] is an immutable username/password pair as issued by the
//! secret manager, optionally carrying the lease it was issued under. The
//! [`CredentialStore`] holds the one credential the process is currently
//! authenticated with, together with the handle it opened and the wall-clock
//! expiry of its lease, and decides whether a newly observed credential is
//! worth reconnecting for.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Password
// ============================================================================

/// A password that never prints itself
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the plaintext for handing to a driver
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"******\"")
    }
}

// ============================================================================
// Credential
// ============================================================================

/// A username/password pair issued by the secret manager
///
/// Identity is the trimmed `(username, password)` pair; the lease fields are
/// carried along for scheduling and diagnostics only.
#[derive(Clone, Debug)]
pub struct Credential {
    username: String,
    password: Password,
    lease_duration: Option<Duration>,
    lease_id: Option<String>,
}

impl Credential {
    /// Create a non-expiring credential. Both fields are trimmed.
    pub fn new(username: impl AsRef<str>, password: impl AsRef<str>) -> Self {
        Self {
            username: username.as_ref().trim().to_string(),
            password: Password::new(password.as_ref().trim()),
            lease_duration: None,
            lease_id: None,
        }
    }

    /// Attach a lease duration. A zero duration means the credential does not expire.
    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = (!duration.is_zero()).then_some(duration);
        self
    }

    /// Attach the secret manager's lease identifier
    pub fn with_lease_id(mut self, lease_id: impl Into<String>) -> Self {
        self.lease_id = Some(lease_id.into());
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &Password {
        &self.password
    }

    pub fn lease_duration(&self) -> Option<Duration> {
        self.lease_duration
    }

    pub fn lease_id(&self) -> Option<&str> {
        self.lease_id.as_deref()
    }

    /// Whether two credentials authenticate as the same principal
    pub fn same_identity(&self, other: &Credential) -> bool {
        self.username == other.username && self.password == other.password
    }

    /// Absolute expiry of this credential's lease if committed at `now`
    pub fn expiry_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let lease = chrono::Duration::from_std(self.lease_duration?).ok()?;
        now.checked_add_signed(lease)
    }
}

// ============================================================================
// Connection State
// ============================================================================

/// Snapshot of what the process is connected with
///
/// Never updated in place: every transition builds a new value and swaps it
/// in whole, so readers always see a credential, handle and expiry that
/// belong together.
#[derive(Debug)]
pub struct ConnectionState<H> {
    credential: Option<Credential>,
    handle: Option<H>,
    lease_expiry: Option<DateTime<Utc>>,
}

impl<H> ConnectionState<H> {
    /// The state before the first connect and after close
    pub fn empty() -> Self {
        Self {
            credential: None,
            handle: None,
            lease_expiry: None,
        }
    }

    fn connected(credential: Credential, handle: H, now: DateTime<Utc>) -> Self {
        let lease_expiry = credential.expiry_from(now);
        Self {
            credential: Some(credential),
            handle: Some(handle),
            lease_expiry,
        }
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn handle(&self) -> Option<&H> {
        self.handle.as_ref()
    }

    pub fn lease_expiry(&self) -> Option<DateTime<Utc>> {
        self.lease_expiry
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    /// Whole seconds left on the lease at `now`, floored at zero
    pub fn seconds_remaining_at(&self, now: DateTime<Utc>) -> Option<u64> {
        self.lease_expiry
            .map(|expiry| (expiry - now).num_seconds().max(0) as u64)
    }
}

// ============================================================================
// Credential Store
// ============================================================================

/// Holder of the single active [`ConnectionState`]
///
/// Reads are lock-free snapshots. Writers are expected to be serialized by
/// the caller; the store itself only guarantees that each write is a single
/// atomic swap.
pub struct CredentialStore<H> {
    state: ArcSwap<ConnectionState<H>>,
}

impl<H> Default for CredentialStore<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> CredentialStore<H> {
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(ConnectionState::empty()),
        }
    }

    /// Current state snapshot
    pub fn snapshot(&self) -> Arc<ConnectionState<H>> {
        self.state.load_full()
    }

    /// True when there is no active credential or `proposed` differs from it
    pub fn should_reconnect(&self, proposed: &Credential) -> bool {
        match self.state.load().credential() {
            Some(active) => !active.same_identity(proposed),
            None => true,
        }
    }

    /// Make `credential` and its `handle` active, with the lease starting now.
    /// Returns the superseded state.
    pub fn commit(&self, credential: Credential, handle: H) -> Arc<ConnectionState<H>> {
        self.commit_at(credential, handle, Utc::now())
    }

    /// Like [`commit`](Self::commit) with an explicit lease start
    pub fn commit_at(
        &self,
        credential: Credential,
        handle: H,
        now: DateTime<Utc>,
    ) -> Arc<ConnectionState<H>> {
        self.state
            .swap(Arc::new(ConnectionState::connected(credential, handle, now)))
    }

    /// Reset to empty, returning the previous state
    pub fn clear(&self) -> Arc<ConnectionState<H>> {
        self.state.swap(Arc::new(ConnectionState::empty()))
    }

    pub fn lease_expiry(&self) -> Option<DateTime<Utc>> {
        self.state.load().lease_expiry()
    }

    pub fn seconds_remaining_at(&self, now: DateTime<Utc>) -> Option<u64> {
        self.state.load().seconds_remaining_at(now)
    }
}

// ============================================================================
// Tests
// ============================================================================
