/**
 * Session Tokens
 *
 * Clients authenticate the websocket upgrade with a JWT issued by the
 * account service. This module verifies those tokens and turns their
 * claims into the `UserIdentity` a sync session runs as.
 */

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::backend::error::{BackendError, BackendResult};

/// Token lifetime of `create_token`
const TOKEN_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// JWT claims structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    /// Email
    #[serde(default)]
    pub email: String,
    /// Display name
    #[serde(default)]
    pub username: Option<String>,
    /// Avatar URL
    #[serde(default)]
    pub avatar: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at time (Unix timestamp)
    pub iat: u64,
}

/// The user a session acts for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    pub nickname: String,
    pub avatar: String,
}

impl UserIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }
}

impl From<Claims> for UserIdentity {
    fn from(claims: Claims) -> Self {
        let nickname = claims
            .username
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| claims.email.split('@').next().unwrap_or_default().to_string());
        Self {
            user_id: claims.sub,
            nickname,
            avatar: claims.avatar.unwrap_or_default(),
        }
    }
}

/// Create a JWT token for a user
///
/// # Arguments
/// * `user_id` - User ID
/// * `email` - User email
/// * `username` - Display name, if any
/// * `secret` - Signing secret
pub fn create_token(
    user_id: &str,
    email: &str,
    username: Option<&str>,
    secret: &str,
) -> BackendResult<String> {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        username: username.map(str::to_string),
        avatar: None,
        exp: now + TOKEN_TTL_SECS,
        iat: now,
    };
    let key = EncodingKey::from_secret(secret.as_ref());
    encode(&Header::default(), &claims, &key)
        .map_err(|err| BackendError::state(format!("failed to sign token: {}", err)))
}

/// Verify and decode a JWT token
///
/// # Errors
///
/// `BackendError::AuthError` for a malformed, expired or foreign token.
pub fn verify_token(token: &str, secret: &str) -> BackendResult<Claims> {
    let key = DecodingKey::from_secret(secret.as_ref());
    let token_data = decode::<Claims>(token, &key, &Validation::default())
        .map_err(|err| BackendError::auth(format!("token verification failed: {}", err)))?;
    if token_data.claims.sub.is_empty() {
        return Err(BackendError::auth("token has no subject"));
    }
    Ok(token_data.claims)
}
