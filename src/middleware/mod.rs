//! Middleware module
//!
//! Request logging with trace IDs and the credential lease response header.

pub mod lease_header;
pub mod logging;

// Re-export commonly used items
pub use lease_header::{lease_header, LEASE_HEADER};
pub use logging::{log_request, TraceId, REQUEST_ID_HEADER, TRACE_ID_HEADER};
