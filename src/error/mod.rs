//! Error types for the HTTP surface

mod types;

pub use types::ApiError;
