//! API endpoint handlers module
//!
//! Health probes, database lease diagnostics and document probes.

pub mod health;
pub mod lease;
pub mod probe;
