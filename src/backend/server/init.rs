/**
 * Server Initialization
 *
 * Builds the services, the application state and the router.
 *
 * # Initialization Process
 *
 * 1. Connect to Postgres when configured, running migrations
 * 2. Build the backends: Postgres-backed, or in-memory for one process
 * 3. Compose the sync services
 * 4. Create the router
 * 5. Start the maintenance task
 */

use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use crate::backend::error::BackendResult;
use crate::backend::routes::router::create_router;
use crate::backend::server::config::load_database;
use crate::backend::server::services::{Backends, Housekeeping, SyncServices};
use crate::backend::server::state::AppState;
use crate::shared::config::AppConfig;

/// Interval of the maintenance task
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(300);

/// Age after which spilled fanout payloads are removed
pub const SPILL_RETENTION: Duration = Duration::from_secs(600);

/// Create and configure the Axum application
///
/// # Errors
///
/// Database connection, migration or backend setup failures. A missing
/// database URL is not an error; the server then runs single-process.
pub async fn create_app(config: AppConfig) -> BackendResult<Router<()>> {
    tracing::info!("Initializing xfsync server");

    // Step 1: Optional database
    let pool = load_database(&config.database).await?;

    // Step 2: Backends
    let backends = match pool {
        Some(pool) => Backends::postgres(pool, &config).await?,
        None => Backends::local(&config)?,
    };

    // Step 3: Services
    let services = Arc::new(SyncServices::assemble(backends, &config));
    tracing::info!(
        materialization = services.materializer.is_some(),
        "sync services initialized"
    );

    // Step 4: Router
    let app_state = AppState::new(services.clone(), config.auth.jwt_secret.clone());
    let app = create_router(app_state);

    // Step 5: Periodic maintenance of caches and fanout topics
    spawn_maintenance(services.housekeeping.clone());
    tracing::info!("Router configured with periodic maintenance task");

    Ok(app)
}

fn spawn_maintenance(housekeeping: Housekeeping) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        // the first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            housekeeping.run_once(SPILL_RETENTION).await;
            tracing::debug!("maintenance pass finished");
        }
    });
}
