//! Application settings and configuration
//!
//! This module provides configuration management for the application,
//! loading settings from environment variables with sensible defaults.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::time::Duration;

use crate::utils::retry::{presets, BackoffPolicy};
use crate::utils::timeout::TimeoutConfig;

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[value(alias = "dev")]
    Development,
    #[value(alias = "stage")]
    Staging,
    #[value(alias = "prod")]
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => anyhow::bail!("Invalid environment: {}. Expected: development, staging, or production", s),
        }
    }
}

/// Where database credentials come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    /// Dynamic, leased credentials from Vault's database secrets engine
    Vault,
    /// A fixed username/password from the environment
    Static,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Vault => write!(f, "vault"),
            CredentialSource::Static => write!(f, "static"),
        }
    }
}

impl std::str::FromStr for CredentialSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vault" => Ok(CredentialSource::Vault),
            "static" => Ok(CredentialSource::Static),
            _ => anyhow::bail!("Invalid credential source: {}. Expected: vault or static", s),
        }
    }
}

/// Couchbase connection and retry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CouchbaseConfig {
    /// Connection string, e.g. `couchbase://couchbase`. Empty when unset.
    pub connection_string: String,
    /// Bucket to open. Empty when unset.
    pub bucket: String,
    pub retry_attempts: u32,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub retry_jitter_ms: u64,
    pub probe_timeout_ms: u64,
    pub request_timeout_seconds: u64,
}

impl Default for CouchbaseConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            bucket: String::new(),
            retry_attempts: 10,
            retry_initial_ms: 400,
            retry_max_ms: 2000,
            retry_jitter_ms: 250,
            probe_timeout_ms: 2000,
            request_timeout_seconds: 10,
        }
    }
}

impl CouchbaseConfig {
    /// Backoff policy for authorization retries
    pub fn backoff_policy(&self) -> BackoffPolicy {
        presets::couchbase_auth()
            .with_max_attempts(self.retry_attempts)
            .with_base_delay(Duration::from_millis(self.retry_initial_ms))
            .with_max_delay(Duration::from_millis(self.retry_max_ms))
            .with_jitter(Duration::from_millis(self.retry_jitter_ms))
    }

    /// Timeouts for probes and driver requests
    pub fn timeouts(&self) -> TimeoutConfig {
        TimeoutConfig::new()
            .with_probe_timeout(Duration::from_millis(self.probe_timeout_ms))
            .with_connect_timeout(Duration::from_secs(self.request_timeout_seconds))
    }
}

/// Vault configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VaultConfig {
    pub addr: String,
    #[serde(skip_serializing)]
    pub token: String,
    /// Database secrets engine role to request credentials for
    pub role: String,
    pub timeout_seconds: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            token: String::new(),
            role: "readonly".to_string(),
            timeout_seconds: 10,
        }
    }
}

/// Static credential configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StaticCredentialConfig {
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

/// Rotation scheduling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RotationConfig {
    /// Point within a lease at which to fetch the next credential (0, 1]
    pub lease_fraction: f64,
    /// Floor for lease-based wake-ups
    pub min_interval_seconds: u64,
    /// Poll interval when the credential does not expire
    pub static_poll_seconds: u64,
    /// Wake-up after a failed tick
    pub retry_seconds: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            lease_fraction: 0.75,
            min_interval_seconds: 5,
            static_poll_seconds: 300,
            retry_seconds: 30,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    // App settings
    pub app_name: String,
    pub app_version: String,
    pub environment: Environment,
    pub log_level: String,

    // Server settings
    pub host: String,
    pub port: u16,

    // Database
    pub couchbase: CouchbaseConfig,

    // Credentials
    pub credential_source: CredentialSource,
    pub vault: VaultConfig,
    pub static_credentials: StaticCredentialConfig,

    // Rotation
    pub rotation: RotationConfig,
}

impl Settings {
    /// Load settings from environment variables with defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignored in production typically)
        dotenvy::dotenv().ok();

        let settings = Self {
            // App settings
            app_name: env_or_default("APP_NAME", "booklib-backend"),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: env_or_default("ENVIRONMENT", "development")
                .parse()
                .unwrap_or_default(),
            log_level: env_or_default("LOG_LEVEL", "info"),

            // Server settings
            host: env_or_default("HOST", "0.0.0.0"),
            port: env_or_default("PORT", "3000")
                .parse()
                .context("Invalid PORT value")?,

            // Database
            couchbase: CouchbaseConfig {
                connection_string: env_or_default("COUCHBASE_CONNSTR", ""),
                bucket: env_or_default("COUCHBASE_BUCKET", ""),
                retry_attempts: env_or_default("CB_AUTH_RETRY_ATTEMPTS", "10")
                    .parse()
                    .context("Invalid CB_AUTH_RETRY_ATTEMPTS value")?,
                retry_initial_ms: env_or_default("CB_AUTH_RETRY_INITIAL_MS", "400")
                    .parse()
                    .context("Invalid CB_AUTH_RETRY_INITIAL_MS value")?,
                retry_max_ms: env_or_default("CB_AUTH_RETRY_MAX_MS", "2000")
                    .parse()
                    .context("Invalid CB_AUTH_RETRY_MAX_MS value")?,
                retry_jitter_ms: env_or_default("CB_AUTH_RETRY_JITTER_MS", "250")
                    .parse()
                    .context("Invalid CB_AUTH_RETRY_JITTER_MS value")?,
                probe_timeout_ms: env_or_default("CB_PROBE_TIMEOUT_MS", "2000")
                    .parse()
                    .unwrap_or(2000),
                request_timeout_seconds: env_or_default("CB_REQUEST_TIMEOUT_SECS", "10")
                    .parse()
                    .unwrap_or(10),
            },

            // Credentials
            credential_source: env_or_default("CREDENTIAL_SOURCE", "vault").parse()?,
            vault: VaultConfig {
                addr: env_or_default("VAULT_ADDR", ""),
                token: env_or_default("VAULT_TOKEN", ""),
                role: env_or_default("VAULT_DB_ROLE", "readonly"),
                timeout_seconds: env_or_default("VAULT_TIMEOUT_SECS", "10")
                    .parse()
                    .unwrap_or(10),
            },
            static_credentials: StaticCredentialConfig {
                username: env::var("COUCHBASE_USERNAME").ok(),
                password: env::var("COUCHBASE_PASSWORD").ok(),
            },

            // Rotation
            rotation: RotationConfig {
                lease_fraction: env_or_default("ROTATION_LEASE_FRACTION", "0.75")
                    .parse()
                    .context("Invalid ROTATION_LEASE_FRACTION value")?,
                min_interval_seconds: env_or_default("ROTATION_MIN_INTERVAL_SECS", "5")
                    .parse()
                    .unwrap_or(5),
                static_poll_seconds: env_or_default("ROTATION_STATIC_POLL_SECS", "300")
                    .parse()
                    .unwrap_or(300),
                retry_seconds: env_or_default("ROTATION_RETRY_SECS", "30")
                    .parse()
                    .unwrap_or(30),
            },
        };

        // Validate settings
        settings.validate()?;

        Ok(settings)
    }

    /// Validate settings
    ///
    /// A missing connection string or bucket is not rejected here: the
    /// connection manager reports it as a configuration error on connect.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        if self.couchbase.retry_attempts == 0 {
            anyhow::bail!("CB_AUTH_RETRY_ATTEMPTS must be > 0");
        }
        if self.couchbase.retry_max_ms < self.couchbase.retry_initial_ms {
            anyhow::bail!("CB_AUTH_RETRY_MAX_MS must be >= CB_AUTH_RETRY_INITIAL_MS");
        }

        if !(self.rotation.lease_fraction > 0.0 && self.rotation.lease_fraction <= 1.0) {
            anyhow::bail!("ROTATION_LEASE_FRACTION must be in (0, 1]");
        }
        if self.rotation.static_poll_seconds == 0 || self.rotation.retry_seconds == 0 {
            anyhow::bail!("Rotation intervals must be > 0");
        }

        match self.credential_source {
            CredentialSource::Vault => {
                if self.vault.addr.is_empty() || self.vault.token.is_empty() {
                    anyhow::bail!("VAULT_ADDR and VAULT_TOKEN are required when CREDENTIAL_SOURCE=vault");
                }
            }
            CredentialSource::Static => {
                if self.static_credentials.username.is_none()
                    || self.static_credentials.password.is_none()
                {
                    anyhow::bail!(
                        "COUCHBASE_USERNAME and COUCHBASE_PASSWORD are required when CREDENTIAL_SOURCE=static"
                    );
                }
            }
        }

        if self.environment == Environment::Production
            && self.credential_source == CredentialSource::Static
        {
            tracing::warn!("Running in production with static database credentials");
        }

        Ok(())
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Get the server address string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Couchbase timeouts plus the credential fetch bound from `VAULT_TIMEOUT`
    pub fn timeouts(&self) -> TimeoutConfig {
        self.couchbase
            .timeouts()
            .with_provider_timeout(Duration::from_secs(self.vault.timeout_seconds.max(1)))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "booklib-backend".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: Environment::Development,
            log_level: "info".to_string(),
            host: "0.0.0.0".to_string(),
            port: 3000,
            couchbase: CouchbaseConfig::default(),
            credential_source: CredentialSource::Vault,
            vault: VaultConfig::default(),
            static_credentials: StaticCredentialConfig::default(),
            rotation: RotationConfig::default(),
        }
    }
}

/// Helper function to get environment variable with default
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
