//! Test doubles for the top-SQL benchmark harnesses.
//!
//! The doubles stand in for the external systems so the harnesses can be exercised without a
//! database or a collector. See the modules for all available utilities.

pub mod collector;
pub mod server;
pub mod session;
pub mod tracing;
