/**
 * Application State Management
 *
 * `AppState` is the state of the axum router. It holds the composed sync
 * services and the secret session tokens are verified with.
 *
 * # State Extraction
 *
 * The `FromRef` implementation lets a handler extract the services alone
 * with `State(Arc<SyncServices>)`.
 *
 * ```rust,ignore
 * async fn handler(State(services): State<Arc<SyncServices>>) {
 *     let log = services.oplog.pull("d1", 1, 0).await;
 * }
 * ```
 */

use std::sync::Arc;

use axum::extract::FromRef;

use crate::backend::server::services::SyncServices;

/// State of the HTTP router
#[derive(Clone)]
pub struct AppState {
    /// Services shared by every session
    pub services: Arc<SyncServices>,

    /// HMAC secret of session tokens
    pub jwt_secret: String,
}

impl AppState {
    pub fn new(services: Arc<SyncServices>, jwt_secret: impl Into<String>) -> Self {
        Self {
            services,
            jwt_secret: jwt_secret.into(),
        }
    }
}

impl FromRef<AppState> for Arc<SyncServices> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.services.clone()
    }
}
