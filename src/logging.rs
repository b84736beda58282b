//! Logging setup
//!
//! Structured JSON logs through `tracing-subscriber`. `RUST_LOG` wins over
//! the configured level when set. Secrets never reach a log line: passwords
//! travel as [`Password`](crate::services::Password), whose `Debug` output is
//! masked, and the Vault token is never logged.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Dependencies whose debug output drowns out the service's own events
const QUIET_TARGETS: &[&str] = &["hyper=warn", "hyper_util=warn", "reqwest=warn", "rustls=warn"];

/// Filter for `log_level`, falling back to `info` when it does not parse
pub fn filter_for(log_level: &str) -> EnvFilter {
    let directives = std::iter::once(log_level.trim())
        .chain(QUIET_TARGETS.iter().copied())
        .collect::<Vec<_>>()
        .join(",");

    EnvFilter::try_new(&directives).unwrap_or_else(|e| {
        eprintln!("Invalid LOG_LEVEL {:?} ({}), using info", log_level, e);
        EnvFilter::new("info")
    })
}

/// Install the global JSON subscriber
pub fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(log_level));

    let console_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_target(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(console_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}
