/**
 * Router Configuration
 *
 * # Routes
 *
 * - `GET /api/ws?token=<jwt>` - websocket upgrade into a sync session
 * - `GET /health` - liveness probe
 *
 * Every request is traced through `TraceLayer`. Unknown paths get a JSON
 * 404 in the same shape as other HTTP errors.
 */

use axum::{http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::backend::error::BackendError;
use crate::backend::server::state::AppState;
use crate::backend::session::ws_handler;

/// Create the Axum router with all routes configured
pub fn create_router(app_state: AppState) -> Router<()> {
    Router::new()
        .route("/api/ws", get(ws_handler))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn not_found() -> BackendError {
    BackendError::handler(StatusCode::NOT_FOUND, "Not Found")
}
