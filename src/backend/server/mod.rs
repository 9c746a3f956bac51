//! Server Module
//!
//! Startup of the sync server: configuration, the service container, the
//! router state and the initialization sequence.
//!
//! # Architecture
//!
//! - **`config`** - `AppConfig` loading and the Postgres pool
//! - **`services`** - backends and the services composed from them
//! - **`state`** - `AppState` and its `FromRef` implementations
//! - **`init`** - `create_app`
//!
//! # Initialization Flow
//!
//! 1. **Configuration Loading**: file, defaults, environment overrides
//! 2. **Backends**: Postgres when `database.url` is set, in-memory otherwise
//! 3. **Services**: op log, presence, materialization trigger
//! 4. **Router Creation**: websocket and health routes
//! 5. **Background Tasks**: periodic maintenance
//!
//! # Example
//!
//! ```rust,no_run
//! use xfsync::backend::server::{config::load_config, create_app};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config()?;
//! let app = create_app(config).await?;
//! # Ok(())
//! # }
//! ```

/// Application state management
pub mod state;

/// Server configuration loading
pub mod config;

/// Service container
pub mod services;

/// Server initialization
pub mod init;

pub use init::create_app;
pub use services::{Backends, Housekeeping, SyncServices};
pub use state::AppState;
