//! Couchbase REST driver
//!
//! Opens buckets through the cluster management port (8091/18091) using HTTP
//! basic auth. This is enough to verify that a credential is recognized by
//! the cluster's RBAC layer, to probe single documents, and to ping the
//! cluster for health checks.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{ClusterDriver, ClusterHandle, DriverError, ProbeResult, SharedHandle};
use crate::services::credentials::{Credential, Password};

const MANAGEMENT_PORT: u16 = 8091;
const MANAGEMENT_TLS_PORT: u16 = 18091;

// ============================================================================
// Target Resolution
// ============================================================================

/// Turn a connection string into the base URL of the management REST API.
///
/// - `couchbase://host[,host2][?opts]` → `http://host:8091`
/// - `couchbases://host` → `https://host:18091`
/// - `http(s)://...` is used as given
pub fn resolve_base_url(target: &str) -> Result<Url, DriverError> {
    let target = target.trim();

    let base = if let Some(rest) = target.strip_prefix("couchbase://") {
        format!("http://{}:{}", first_host(rest, target)?, MANAGEMENT_PORT)
    } else if let Some(rest) = target.strip_prefix("couchbases://") {
        format!("https://{}:{}", first_host(rest, target)?, MANAGEMENT_TLS_PORT)
    } else if target.starts_with("http://") || target.starts_with("https://") {
        target.trim_end_matches('/').to_string()
    } else {
        return Err(DriverError::InvalidTarget(target.to_string()));
    };

    Url::parse(&base).map_err(|e| DriverError::InvalidTarget(format!("{}: {}", target, e)))
}

/// First seed host of a couchbase connection string, without any port
fn first_host<'a>(rest: &'a str, target: &str) -> Result<&'a str, DriverError> {
    let hosts = rest.split('?').next().unwrap_or_default();
    let host = hosts
        .split(',')
        .next()
        .unwrap_or_default()
        .trim()
        .trim_end_matches('/');

    // Seed ports point at the data service, not the management API
    let host = match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };

    if host.is_empty() {
        return Err(DriverError::InvalidTarget(target.to_string()));
    }
    Ok(host)
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, DriverError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| DriverError::InvalidTarget(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn classify(status: StatusCode, body: String) -> DriverError {
    match status {
        // 403 is what a user sees while its bucket role is still propagating
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            DriverError::Unauthorized(format!("{} {}", status.as_u16(), body).trim().to_string())
        }
        _ => DriverError::Unexpected {
            status: status.as_u16(),
            message: body,
        },
    }
}

// ============================================================================
// Driver
// ============================================================================

/// [`ClusterDriver`] backed by the Couchbase management REST API
#[derive(Clone)]
pub struct HttpClusterDriver {
    client: Client,
}

impl HttpClusterDriver {
    /// Create a driver whose requests are bounded by `request_timeout`
    pub fn new(request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ClusterDriver for HttpClusterDriver {
    async fn open(
        &self,
        target: &str,
        bucket: &str,
        credential: &Credential,
    ) -> Result<SharedHandle, DriverError> {
        let base_url = resolve_base_url(target)?;
        let url = endpoint(&base_url, &["pools", "default", "buckets", bucket])?;

        tracing::debug!(url = %url, user = %credential.username(), "Opening bucket");

        let response = self
            .client
            .get(url)
            .basic_auth(credential.username(), Some(credential.password().expose()))
            .send()
            .await
            .map_err(|e| DriverError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(Arc::new(HttpClusterHandle {
                client: self.client.clone(),
                base_url,
                bucket: bucket.to_string(),
                username: credential.username().to_string(),
                password: credential.password().clone(),
                closed: AtomicBool::new(false),
            }));
        }

        if status == StatusCode::NOT_FOUND {
            return Err(DriverError::BucketNotFound(bucket.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify(status, body))
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Bucket handle holding the credential it was opened with
#[derive(Debug)]
pub struct HttpClusterHandle {
    client: Client,
    base_url: Url,
    bucket: String,
    username: String,
    password: Password,
    closed: AtomicBool,
}

impl HttpClusterHandle {
    async fn get(&self, segments: &[&str]) -> Result<reqwest::Response, DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }

        let url = endpoint(&self.base_url, segments)?;
        self.client
            .get(url)
            .basic_auth(&self.username, Some(self.password.expose()))
            .send()
            .await
            .map_err(|e| DriverError::Unreachable(e.to_string()))
    }
}

#[async_trait]
impl ClusterHandle for HttpClusterHandle {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn probe(&self, key: &str) -> Result<ProbeResult, DriverError> {
        let response = self
            .get(&["pools", "default", "buckets", &self.bucket, "docs", key])
            .await?;

        match response.status() {
            status if status.is_success() => Ok(ProbeResult::Found),
            StatusCode::NOT_FOUND => Ok(ProbeResult::NotFound),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(classify(status, body))
            }
        }
    }

    async fn ping(&self) -> Result<(), DriverError> {
        let response = self.get(&["pools", "default"]).await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify(status, body))
        }
    }

    async fn close(&self) -> Result<(), DriverError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(bucket = %self.bucket, user = %self.username, "Bucket handle closed");
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
