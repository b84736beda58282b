//! Credential providers
//!
//! The rotation task asks a [`CredentialProvider`] for a fresh credential on
//! every tick. [`VaultCredentialProvider`] reads dynamic database credentials
//! from Vault's database secrets engine; [`StaticCredentialProvider`] hands
//! back a fixed, non-expiring pair from configuration.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use super::credentials::Credential;
use crate::config::VaultConfig;

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while fetching a credential
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("secret manager returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("secret manager response missing field: {0}")]
    MissingField(&'static str),

    #[error("provider misconfigured: {0}")]
    Configuration(String),
}

// ============================================================================
// Trait
// ============================================================================

/// Source of database credentials for a role
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn fetch(&self, role: &str) -> Result<Credential, ProviderError>;
}

// ============================================================================
// Vault
// ============================================================================

/// Body of `GET /v1/database/creds/:role`
#[derive(Debug, Deserialize)]
struct VaultLeaseResponse {
    #[serde(default)]
    lease_id: Option<String>,
    #[serde(default)]
    lease_duration: u64,
    #[serde(default)]
    data: Option<VaultCredentialData>,
}

#[derive(Debug, Deserialize)]
struct VaultCredentialData {
    username: Option<String>,
    password: Option<String>,
}

impl VaultLeaseResponse {
    fn into_credential(self) -> Result<Credential, ProviderError> {
        let data = self.data.ok_or(ProviderError::MissingField("data"))?;
        let username = data
            .username
            .filter(|u| !u.trim().is_empty())
            .ok_or(ProviderError::MissingField("data.username"))?;
        let password = data
            .password
            .filter(|p| !p.trim().is_empty())
            .ok_or(ProviderError::MissingField("data.password"))?;

        let mut credential = Credential::new(username, password)
            .with_lease_duration(Duration::from_secs(self.lease_duration));
        if let Some(lease_id) = self.lease_id.filter(|id| !id.is_empty()) {
            credential = credential.with_lease_id(lease_id);
        }
        Ok(credential)
    }
}

/// Dynamic credentials from Vault's database secrets engine
pub struct VaultCredentialProvider {
    client: Client,
    addr: String,
    token: String,
}

impl VaultCredentialProvider {
    pub fn new(config: &VaultConfig) -> Result<Self, ProviderError> {
        if config.addr.trim().is_empty() {
            return Err(ProviderError::Configuration("VAULT_ADDR is empty".into()));
        }
        if config.token.trim().is_empty() {
            return Err(ProviderError::Configuration("VAULT_TOKEN is empty".into()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            addr: config.addr.trim().trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn creds_url(&self, role: &str) -> String {
        format!("{}/v1/database/creds/{}", self.addr, role)
    }
}

#[async_trait]
impl CredentialProvider for VaultCredentialProvider {
    fn name(&self) -> &str {
        "vault"
    }

    async fn fetch(&self, role: &str) -> Result<Credential, ProviderError> {
        let url = self.creds_url(role);
        tracing::debug!(url = %url, role = %role, "Requesting dynamic database credentials");

        let response = self
            .client
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: VaultLeaseResponse = response.json().await?;
        let credential = body.into_credential()?;

        tracing::info!(
            role = %role,
            user = %credential.username(),
            lease_id = %credential.lease_id().unwrap_or("-"),
            lease_seconds = credential.lease_duration().map(|d| d.as_secs()).unwrap_or(0),
            "Fetched dynamic database credentials"
        );

        Ok(credential)
    }
}

// ============================================================================
// Static
// ============================================================================

/// Always returns the same non-expiring credential
pub struct StaticCredentialProvider {
    credential: Credential,
}

impl StaticCredentialProvider {
    pub fn new(username: impl AsRef<str>, password: impl AsRef<str>) -> Self {
        Self {
            credential: Credential::new(username, password),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self, _role: &str) -> Result<Credential, ProviderError> {
        Ok(self.credential.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================
