//! Authentication Module
//!
//! Token verification for the websocket upgrade. Tokens are issued by the
//! account service; this backend only verifies them.
//!
//! # Architecture
//!
//! - **`sessions`** - JWT claims, `create_token`, `verify_token`, `UserIdentity`
//! - **`extractor`** - `AuthUser`, the axum extractor used by the upgrade route
//!
//! # Authentication Flow
//!
//! 1. Client opens `GET /api/ws?token=<jwt>`
//! 2. `AuthUser` verifies the token against `auth.jwt_secret`
//! 3. The session runs as the token's subject; invalid tokens get 401

/// JWT token generation and validation
pub mod sessions;

/// Request extractor
pub mod extractor;

pub use extractor::{extract_token, AuthUser};
pub use sessions::{create_token, verify_token, Claims, UserIdentity};
