//! Backend Module
//!
//! This module contains all server-side code of the sync server: an Axum
//! HTTP server whose websocket sessions multiplex the logical channels of a
//! collaborative document over one connection.
//!
//! This module is only compiled when the `ssr` feature is enabled.
//!
//! # Architecture
//!
//! - **`server`** - Configuration, service container, state, initialization
//! - **`routes`** - Router assembly
//! - **`session`** - Connection sessions and their channel handlers
//! - **`oplog`** - Operation log store and the commit/pull service
//! - **`coordination`** - Distributed locks, the shared cache, key naming
//! - **`realtime`** - Fanout bus and topic naming
//! - **`presence`** - Cursor and selection state
//! - **`versioning`** - Snapshot materialization
//! - **`directory`** - Documents, permissions, credentials, blob storage
//! - **`auth`** - Session tokens and the request extractor
//! - **`error`** - Backend error types
//!
//! # Module Structure
//!
//! ```text
//! backend/
//! ├── mod.rs          - Module exports and documentation
//! ├── server/         - Startup and state
//! ├── routes/         - Route configuration
//! ├── session/        - Multiplexer and channels
//! ├── oplog/          - Operation log
//! ├── coordination/   - Locks and cache
//! ├── realtime/       - Fanout bus
//! ├── presence/       - Presence
//! ├── versioning/     - Materialization
//! ├── directory/      - Collaborators
//! ├── auth/           - Authentication
//! └── error/          - Error types
//! ```
//!
//! # Process Model
//!
//! Every shared seam (log store, cache, locks, bus, version store) is a
//! trait object with an in-memory and a Postgres implementation. With a
//! database configured, any number of server processes can serve the same
//! documents; without one, the server runs as a single process.
//!
//! # Example
//!
//! ```rust,no_run
//! use xfsync::backend::server::{config::load_config, create_app};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let app = create_app(load_config()?).await?;
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

/// Server setup and configuration
pub mod server;

/// Route configuration
pub mod routes;

/// Connection sessions
pub mod session;

/// Operation log
pub mod oplog;

/// Locks and shared cache
pub mod coordination;

/// Fanout bus
pub mod realtime;

/// Presence records
pub mod presence;

/// Snapshot materialization
pub mod versioning;

/// Documents, permissions, credentials and blobs
pub mod directory;

/// Authentication
pub mod auth;

/// Backend error types
pub mod error;

pub use error::{BackendError, BackendResult};
pub use server::{create_app, AppState, SyncServices};
pub use session::SyncSession;
