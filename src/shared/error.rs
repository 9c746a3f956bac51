//! Shared Error Types
//!
//! This module defines error types for the wire-level types in `shared`.
//! They describe failures that a client and the server both hit when
//! encoding or decoding envelopes, frames and payloads.
//!
//! # Error Categories
//!
//! - `SerializationError` - JSON serialization/deserialization failures
//! - `ValidationError` - A payload decoded but a field is unusable
//! - `FrameError` - A binary frame is truncated or its length prefix is wrong
//!
//! # Usage
//!
//! ```rust
//! use xfsync::shared::error::SharedError;
//!
//! let error = SharedError::validation("document_id", "document id is required");
//! assert!(error.to_string().contains("document_id"));
//! ```
use thiserror::Error;

/// Shared error types that can occur on either side of a connection
#[derive(Debug, Error, Clone)]
pub enum SharedError {
    /// JSON serialization or deserialization error
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Human-readable error message
        message: String,
    },

    /// Data validation error
    #[error("Validation error in field '{field}': {message}")]
    ValidationError {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },

    /// Binary frame error
    #[error("Frame error: {message}")]
    FrameError {
        /// Human-readable error message
        message: String,
    },
}

impl SharedError {
    /// Create a new serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new frame error
    pub fn frame(message: impl Into<String>) -> Self {
        Self::FrameError {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for SharedError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}
