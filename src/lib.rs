//! XFSync - Realtime Collaboration Backend
//!
//! XFSync is the realtime sync server of a shared-document editor. Clients
//! hold one websocket each and multiplex several logical channels over it:
//! operations, comments, presence, uploads and version notifications.
//!
//! # Overview
//!
//! - Every committed operation gets a per-document version number from a
//!   commit protocol serialized by a distributed lease lock.
//! - Committed batches are appended to a durable log with idempotency keys,
//!   then fanned out to every process that has a client on the document.
//! - Clients catch up from the log on start and receive live pushes after.
//! - A throttled trigger asks an external generator to fold the log into
//!   document snapshots.
//!
//! # Module Structure
//!
//! - **`shared`** - Wire-level types (envelope, frames, payloads, config)
//! - **`backend`** - The server (only compiled with the `ssr` feature)
//!
//! # Feature Flags
//!
//! - **`ssr`** (default) - Enables the server modules and binary
//!
//! # Usage
//!
//! ```rust,no_run
//! use xfsync::backend::server::init::create_app;
//! use xfsync::shared::AppConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! let app = create_app(config).await?;
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

/// Shared types and data structures
pub mod shared;

/// Backend server-side code
#[cfg(feature = "ssr")]
pub mod backend;
