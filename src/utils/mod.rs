//! Utility modules
//!
//! Backoff policy, timeout handling, and lease formatting helpers.

pub mod format;
pub mod retry;
pub mod timeout;

pub use format::{format_date, format_ttl};
pub use retry::BackoffPolicy;
pub use timeout::{with_timeout, TimeoutConfig, TimeoutError};
