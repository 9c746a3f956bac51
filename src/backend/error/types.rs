/**
 * Backend Error Types
 *
 * This module defines the error type of the sync server. The same type is
 * used by HTTP handlers, where it becomes a JSON response, and by channel
 * handlers, where it becomes the `err`/`code` of a reply envelope.
 *
 * # Error Categories
 *
 * ## Client Errors
 *
 * - Malformed envelopes or payloads (`ProtocolError`, `SharedError`)
 * - Insufficient permission (`PermissionDenied`)
 * - Unknown documents (`NotFound`)
 * - Administratively locked documents (`ContentLocked`)
 *
 * ## Coordination Errors
 *
 * - Commit lock not acquired within the wait budget (`LockUnavailable`).
 *   This is the only retryable error.
 *
 * ## Infrastructure Errors
 *
 * - Log store, cache or bus failures (`StoreError`, `DatabaseError`)
 * - Snapshot generator failures (`UpstreamError`)
 */

use axum::http::StatusCode;
use thiserror::Error;

use crate::shared::SharedError;

/// Status used for documents that are locked for review
pub const STATUS_CONTENT_LOCKED: u16 = 494;

/// Backend-specific error types
///
/// # Usage
///
/// ```rust
/// use xfsync::backend::error::BackendError;
/// use axum::http::StatusCode;
///
/// let err = BackendError::handler(StatusCode::BAD_REQUEST, "Invalid request");
/// assert_eq!(err.code(), 400);
///
/// let err = BackendError::lock_unavailable("commit lock for d1");
/// assert!(err.is_retryable());
/// ```
#[derive(Debug, Error)]
pub enum BackendError {
    /// Handler error with an explicit status
    #[error("Handler error: {message}")]
    HandlerError {
        /// HTTP status code for this error
        status: StatusCode,
        /// Human-readable error message
        message: String,
    },

    /// Internal state could not be used (closed channel, poisoned lock)
    #[error("State error: {message}")]
    StateError {
        /// Human-readable error message
        message: String,
    },

    /// The client broke the wire protocol
    #[error("Protocol error: {message}")]
    ProtocolError {
        /// Human-readable error message
        message: String,
    },

    /// The requested document does not exist
    #[error("Document not found: {document_id}")]
    NotFound {
        /// Requested document
        document_id: String,
    },

    /// The caller's permission is below what the action needs
    #[error("Permission denied: {message}")]
    PermissionDenied {
        /// Human-readable error message
        message: String,
    },

    /// The document is locked and the caller is not its owner
    #[error("Document {document_id} is locked: {reasons:?}")]
    ContentLocked {
        document_id: String,
        reasons: Vec<String>,
    },

    /// A distributed lock was not acquired in time
    #[error("Lock acquisition failed: {name}")]
    LockUnavailable {
        /// Lock name
        name: String,
    },

    /// Log store, cache or bus failure
    #[error("Store error: {message}")]
    StoreError {
        /// Human-readable error message
        message: String,
    },

    /// An external service answered with a failure
    #[error("Upstream error: {message}")]
    UpstreamError {
        /// Human-readable error message
        message: String,
    },

    /// Token missing or invalid
    #[error("Authentication failed: {message}")]
    AuthError {
        /// Human-readable error message
        message: String,
    },

    /// Shared error (from shared module)
    #[error(transparent)]
    SharedError(#[from] SharedError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl BackendError {
    /// Create a new handler error with a status code
    pub fn handler(status: StatusCode, message: impl Into<String>) -> Self {
        Self::HandlerError {
            status,
            message: message.into(),
        }
    }

    /// Create a new state error
    pub fn state(message: impl Into<String>) -> Self {
        Self::StateError {
            message: message.into(),
        }
    }

    /// Create a new protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }

    /// Create a not-found error for a document
    pub fn not_found(document_id: impl Into<String>) -> Self {
        Self::NotFound {
            document_id: document_id.into(),
        }
    }

    /// Create a permission error
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Create a lock error
    pub fn lock_unavailable(name: impl Into<String>) -> Self {
        Self::LockUnavailable { name: name.into() }
    }

    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreError {
            message: message.into(),
        }
    }

    /// Create an upstream error
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::UpstreamError {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::AuthError {
            message: message.into(),
        }
    }

    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockUnavailable { .. })
    }

    /// Get the HTTP status code for this error
    ///
    /// # Status Code Mapping
    ///
    /// - `HandlerError` - Uses the status code from the error
    /// - `ProtocolError`, `SharedError` - 400 Bad Request
    /// - `AuthError` - 401 Unauthorized
    /// - `PermissionDenied` - 403 Forbidden
    /// - `NotFound` - 404 Not Found
    /// - `LockUnavailable` - 423 Locked
    /// - `ContentLocked` - 494
    /// - `UpstreamError` - 502 Bad Gateway
    /// - everything else - 500 Internal Server Error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::HandlerError { status, .. } => *status,
            Self::StateError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ProtocolError { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            Self::ContentLocked { .. } => {
                StatusCode::from_u16(STATUS_CONTENT_LOCKED).unwrap_or(StatusCode::FORBIDDEN)
            }
            Self::LockUnavailable { .. } => StatusCode::LOCKED,
            Self::StoreError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UpstreamError { .. } => StatusCode::BAD_GATEWAY,
            Self::AuthError { .. } => StatusCode::UNAUTHORIZED,
            Self::SharedError(err) => match err {
                SharedError::SerializationError { .. } => StatusCode::BAD_REQUEST,
                SharedError::ValidationError { .. } => StatusCode::BAD_REQUEST,
                SharedError::FrameError { .. } => StatusCode::BAD_REQUEST,
            },
            Self::SerializationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Code placed in the `code` field of an error reply envelope
    pub fn code(&self) -> i32 {
        i32::from(self.status_code().as_u16())
    }

    /// Get the error message
    pub fn message(&self) -> String {
        match self {
            Self::HandlerError { message, .. } => message.clone(),
            Self::StateError { message } => message.clone(),
            Self::ProtocolError { message } => message.clone(),
            Self::PermissionDenied { message } => message.clone(),
            Self::StoreError { message } => message.clone(),
            Self::UpstreamError { message } => message.clone(),
            Self::AuthError { message } => message.clone(),
            other => other.to_string(),
        }
    }
}
