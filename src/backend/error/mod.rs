//! Backend Error Module
//!
//! This module defines the error type of the sync server.
//!
//! # Architecture
//!
//! - **`types`** - Error type definitions and constructors
//! - **`conversion`** - Conversions into HTTP responses and reply envelopes
//!
//! # Module Structure
//!
//! ```text
//! error/
//! ├── mod.rs        - Module exports and documentation
//! ├── types.rs      - Error type definitions
//! └── conversion.rs - Error conversion implementations
//! ```

/// Error type definitions
pub mod types;

/// Error conversion implementations
pub mod conversion;

pub use types::{BackendError, STATUS_CONTENT_LOCKED};

/// Result alias used across the backend
pub type BackendResult<T> = Result<T, BackendError>;
