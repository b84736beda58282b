//! Application server
//!
//! Wires the credential provider, cluster driver, connection manager and
//! rotation task together, serves the HTTP surface, and tears everything
//! down in order on shutdown.

use crate::{
    config::{CredentialSource, Settings},
    server::{routes, state::AppState},
    services::{
        ClusterDriver, ConnectionManager, CredentialProvider, HttpClusterDriver, RotationDriver,
        RotationHandle, StaticCredentialProvider, VaultCredentialProvider,
    },
    utils::timeout::with_timeout,
};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

/// Upper bound on closing the database connection at shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Main application struct
pub struct App {
    settings: Arc<Settings>,
    provider: Arc<dyn CredentialProvider>,
    state: AppState,
}

impl App {
    /// Create a new application instance backed by the Couchbase REST API
    /// and the configured credential source
    pub async fn new(settings: Settings) -> Result<Self> {
        tracing::debug!("Initializing application state");

        let driver = HttpClusterDriver::new(settings.couchbase.timeouts().connect_timeout)
            .context("Failed to build Couchbase HTTP client")?;
        let provider = build_provider(&settings)?;

        Ok(Self::from_parts(settings, Arc::new(driver), provider))
    }

    /// Assemble the application from explicit collaborators
    pub fn from_parts(
        settings: Settings,
        driver: Arc<dyn ClusterDriver>,
        provider: Arc<dyn CredentialProvider>,
    ) -> Self {
        let settings = Arc::new(settings);
        let connections = Arc::new(ConnectionManager::new(driver, &settings.couchbase));
        let state = AppState::new(settings.clone(), connections);

        Self {
            settings,
            provider,
            state,
        }
    }

    fn fetch_timeout(&self) -> Duration {
        self.settings.timeouts().provider_timeout
    }

    /// Fetch the first credential and open the bucket.
    ///
    /// Failure here is fatal for the process.
    pub async fn connect(&self) -> Result<()> {
        let role = &self.settings.vault.role;
        tracing::info!(
            source = %self.settings.credential_source,
            role = %role,
            bucket = %self.state.connections.bucket(),
            "Fetching initial database credential"
        );

        let credential = with_timeout(self.fetch_timeout(), self.provider.fetch(role))
            .await
            .context("Failed to fetch initial database credential")?;

        self.state
            .connections
            .connect_with(credential)
            .await
            .context("Initial Couchbase connection failed")?;

        Ok(())
    }

    /// Start the background rotation task
    pub fn start_rotation(&self) -> RotationHandle {
        RotationDriver::new(
            self.provider.clone(),
            self.state.connections.clone(),
            self.settings.vault.role.clone(),
            self.settings.rotation.clone(),
        )
        .with_fetch_timeout(self.fetch_timeout())
        .spawn()
    }

    /// Connect, start rotation, and serve until SIGINT or SIGTERM.
    ///
    /// Shutdown stops rotation first, then drains the HTTP server, then
    /// closes the database connection.
    pub async fn run_with_graceful_shutdown(self) -> Result<()> {
        let addr = self
            .settings
            .server_addr()
            .parse::<SocketAddr>()
            .context("Invalid HOST/PORT")?;

        self.connect().await?;
        let rotation = self.start_rotation();

        let router = routes::create_router(self.state.clone());
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        tracing::info!("Backend service running on {}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                rotation.stop().await;
                tracing::info!("Credential rotation stopped, closing HTTP server");
            })
            .await?;

        tracing::info!("HTTP server closed");
        self.cleanup().await;

        Ok(())
    }

    /// Close the database connection, bounded by the shutdown grace period
    async fn cleanup(&self) {
        if tokio::time::timeout(SHUTDOWN_GRACE, self.state.connections.close())
            .await
            .is_err()
        {
            tracing::warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "Timed out closing Couchbase connection"
            );
        }
    }

    /// Get a reference to the application state
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get a reference to the settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

/// Build the credential provider selected by `CREDENTIAL_SOURCE`
pub fn build_provider(settings: &Settings) -> Result<Arc<dyn CredentialProvider>> {
    match settings.credential_source {
        CredentialSource::Vault => {
            let provider = VaultCredentialProvider::new(&settings.vault)
                .context("Failed to configure Vault credential provider")?;
            Ok(Arc::new(provider))
        }
        CredentialSource::Static => {
            let username = settings
                .static_credentials
                .username
                .as_deref()
                .context("COUCHBASE_USERNAME is not set")?;
            let password = settings
                .static_credentials
                .password
                .as_deref()
                .context("COUCHBASE_PASSWORD is not set")?;
            Ok(Arc::new(StaticCredentialProvider::new(username, password)))
        }
    }
}

/// Create a future that completes when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
