//! Application configuration module
//!
//! Provides the configuration types for the sync server. A configuration is
//! read from a TOML file, then selected values are overridden from the
//! environment. Every section has defaults, so an empty file is valid.
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:8080"
//!
//! [database]
//! url = "postgres://localhost/xfsync"
//!
//! [versioning]
//! generator_url = "http://localhost:9000/generate"
//! min_update_interval_secs = 60
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub sync: SyncConfig,
    pub versioning: VersioningConfig,
    pub storage: StorageConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Postgres connection; without a URL the server runs single-process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: Option<u32>,
}

/// Session token verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me".to_string(),
        }
    }
}

/// Commit lock, caches and connection timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Lease of the per-document commit lock
    pub lock_ttl_secs: u64,
    /// How long a commit waits for the lock before failing
    pub lock_wait_ms: u64,
    /// Lifetime of the cached last version number
    pub version_cache_ttl_secs: u64,
    /// Lifetime of a presence record without updates
    pub presence_ttl_secs: u64,
    /// How often presence channels look for lapsed records
    pub presence_sweep_secs: u64,
    pub heartbeat_interval_ms: u64,
    /// Receive silence after which a connection is considered dead
    pub idle_timeout_secs: u64,
    /// Pending outbound messages per connection
    pub outbox_capacity: usize,
    /// Consecutive malformed frames tolerated before closing
    pub max_protocol_errors: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: 10,
            lock_wait_ms: 3_000,
            version_cache_ttl_secs: 600,
            presence_ttl_secs: 3_600,
            presence_sweep_secs: 5,
            heartbeat_interval_ms: 1_000,
            idle_timeout_secs: 60,
            outbox_capacity: 1_024,
            max_protocol_errors: 16,
        }
    }
}

impl SyncConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn version_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.version_cache_ttl_secs)
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }

    pub fn presence_sweep(&self) -> Duration {
        Duration::from_secs(self.presence_sweep_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Snapshot materialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersioningConfig {
    /// Snapshot generator endpoint; materialization is off without it
    pub generator_url: Option<String>,
    pub min_update_interval_secs: u64,
    /// Fewer new operations than this are not worth a snapshot
    pub min_cmd_count: usize,
    pub lock_ttl_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            generator_url: None,
            min_update_interval_secs: 60,
            min_cmd_count: 1,
            lock_ttl_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

impl VersioningConfig {
    pub fn min_update_interval(&self) -> Duration {
        Duration::from_secs(self.min_update_interval_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Blob storage and the credentials handed to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: String,
    pub provider: String,
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub credential_secret: String,
    pub credential_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "./data/blobs".to_string(),
            provider: "local".to_string(),
            bucket: "documents".to_string(),
            endpoint: "http://127.0.0.1:8080/storage".to_string(),
            region: "local".to_string(),
            credential_secret: "change-me-too".to_string(),
            credential_ttl_secs: 3_600,
        }
    }
}

impl StorageConfig {
    pub fn credential_ttl(&self) -> Duration {
        Duration::from_secs(self.credential_ttl_secs)
    }
}

impl AppConfig {
    /// Create a new AppConfigBuilder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(format!("{}: {}", path.display(), err)))?;
        Self::from_toml_str(&text)
    }

    /// Override values from environment-style variables
    ///
    /// `lookup` is `std::env::var` in the server and a map in tests. Empty
    /// values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = value("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(secret) = value("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(addr) = value("XFSYNC_BIND_ADDR") {
            self.server.bind_addr = addr;
        }
        if let Some(url) = value("VERSION_SERVER_URL") {
            self.versioning.generator_url = Some(url);
        }
        if let Some(root) = value("STORAGE_ROOT") {
            self.storage.root = root;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::MissingValue("auth.jwt_secret"));
        }
        if self.server.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidValue {
                field: "server.bind_addr",
                message: format!("'{}' is not a socket address", self.server.bind_addr),
            });
        }
        let durations = [
            ("sync.lock_ttl_secs", self.sync.lock_ttl_secs),
            ("sync.version_cache_ttl_secs", self.sync.version_cache_ttl_secs),
            ("sync.presence_ttl_secs", self.sync.presence_ttl_secs),
            ("sync.presence_sweep_secs", self.sync.presence_sweep_secs),
            ("sync.heartbeat_interval_ms", self.sync.heartbeat_interval_ms),
            ("sync.idle_timeout_secs", self.sync.idle_timeout_secs),
            ("versioning.lock_ttl_secs", self.versioning.lock_ttl_secs),
            ("versioning.request_timeout_secs", self.versioning.request_timeout_secs),
            ("storage.credential_ttl_secs", self.storage.credential_ttl_secs),
        ];
        for (field, value) in durations {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        if self.sync.outbox_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.outbox_capacity",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.versioning.min_cmd_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "versioning.min_cmd_count",
                message: "must be at least 1".to_string(),
            });
        }
        if let Some(url) = &self.versioning.generator_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidUrl(url.clone()));
            }
        }
        Ok(())
    }
}

/// Builder for AppConfig
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    /// Set the listen address
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.server.bind_addr = addr.into();
        self
    }

    /// Set the Postgres URL
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database.url = Some(url.into());
        self
    }

    /// Set the token secret
    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.auth.jwt_secret = secret.into();
        self
    }

    /// Replace the sync section
    pub fn sync(mut self, sync: SyncConfig) -> Self {
        self.config.sync = sync;
        self
    }

    /// Replace the versioning section
    pub fn versioning(mut self, versioning: VersioningConfig) -> Self {
        self.config.versioning = versioning;
        self
    }

    /// Replace the storage section
    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = storage;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("failed to read configuration: {0}")]
    Io(String),
}
