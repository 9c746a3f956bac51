/**
 * Authenticated User Extractor
 *
 * Browsers cannot set headers on a websocket upgrade, so the token is taken
 * from the `token` query parameter first and from an
 * `Authorization: Bearer` header otherwise.
 *
 * Rejects with `BackendError::AuthError` (401) when the token is missing
 * or invalid.
 */

use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::Deserialize;

use crate::backend::auth::sessions::{verify_token, UserIdentity};
use crate::backend::error::BackendError;
use crate::backend::server::state::AppState;

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Find the bearer token of a request
pub fn extract_token(parts: &Parts) -> Option<String> {
    let from_query = Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(query)| query.token)
        .filter(|token| !token.is_empty());
    if from_query.is_some() {
        return from_query;
    }
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Axum extractor for the authenticated user
#[derive(Clone, Debug)]
pub struct AuthUser(pub UserIdentity);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = BackendError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = extract_token(parts).ok_or_else(|| {
            tracing::warn!("missing session token");
            BackendError::auth("missing token")
        })?;
        let claims = verify_token(&token, &state.jwt_secret).inspect_err(|err| {
            tracing::warn!(error = %err, "invalid session token");
        })?;
        Ok(AuthUser(UserIdentity::from(claims)))
    }
}
