/**
 * Server Configuration
 *
 * Loading of `AppConfig` and of the optional Postgres pool.
 *
 * # Configuration Sources
 *
 * 1. The TOML file named by `XFSYNC_CONFIG`, when set
 * 2. Built-in defaults otherwise
 * 3. Environment overrides (`DATABASE_URL`, `JWT_SECRET`, ...) on top
 *
 * `.env` is read by the binary before any of this runs.
 */

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::backend::error::BackendResult;
use crate::shared::config::{AppConfig, ConfigError, DatabaseConfig};

/// Environment variable naming the configuration file
pub const CONFIG_PATH_VAR: &str = "XFSYNC_CONFIG";

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Load the configuration from the process environment
///
/// # Errors
///
/// A `ConfigError` if the file cannot be read or parsed, or the result does
/// not validate.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_with(|key| std::env::var(key).ok())
}

/// Load the configuration with `lookup` standing in for the environment
pub fn load_config_with<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match lookup(CONFIG_PATH_VAR).filter(|path| !path.trim().is_empty()) {
        Some(path) => {
            tracing::info!(path = %path, "loading configuration file");
            AppConfig::load(&path)?
        }
        None => {
            tracing::info!("no configuration file, using defaults");
            AppConfig::default()
        }
    };
    config.apply_overrides(lookup);
    config.validate()?;
    Ok(config)
}

/// Connect to Postgres and run migrations
///
/// # Returns
///
/// - `Ok(Some(pool))` when a URL is configured and the schema is current
/// - `Ok(None)` when no URL is configured
///
/// # Errors
///
/// Connection and migration failures. Unlike a missing URL, a configured
/// but unreachable database is fatal: running single-process by accident
/// would split the fleet.
pub async fn load_database(config: &DatabaseConfig) -> BackendResult<Option<PgPool>> {
    let Some(url) = config.url.as_deref().filter(|url| !url.is_empty()) else {
        tracing::warn!("database.url not set, running single-process with in-memory backends");
        return Ok(None);
    };

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS))
        .connect(url)
        .await?;
    tracing::info!("Database connection pool created successfully");

    tracing::info!("Running database migrations...");
    sqlx::migrate!()
        .run(&pool)
        .await
        .map_err(|err| sqlx::Error::Migrate(Box::new(err)))?;
    tracing::info!("Database migrations completed successfully");

    Ok(Some(pool))
}
