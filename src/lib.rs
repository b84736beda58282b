//! Couchbase connection management with rotating dynamic credentials

// Public modules
pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod server;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Settings;
pub use error::ApiError;
pub use server::App;
pub use services::{ConnectionManager, Credential, RotationDriver};
