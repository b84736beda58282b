//! Services module
//!
//! Credential sourcing, the Couchbase connection lifecycle, and the
//! background rotation task.

pub mod cluster;
pub mod connection;
pub mod credentials;
pub mod provider;
pub mod rotation;

pub use cluster::{ClusterDriver, ClusterHandle, DriverError, HttpClusterDriver, SharedHandle};
pub use connection::{ConnectError, ConnectionManager, ReconnectOutcome};
pub use credentials::{Credential, CredentialStore, Password};
pub use provider::{
    CredentialProvider, ProviderError, StaticCredentialProvider, VaultCredentialProvider,
};
pub use rotation::{RotationDriver, RotationHandle, TickOutcome};
