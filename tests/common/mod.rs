//! Common test utilities and helpers
//!
//! - In-memory fixtures and multi-process fleets
//! - Fault-injecting stores and handlers
//! - A driver for sessions over an in-process frame stream
//! - Custom assertion macros

pub mod assertions;
pub mod fixtures;

// Re-export commonly used utilities
pub use assertions::*;
pub use driver::*;
pub use faults::*;
pub use fixtures::*;
