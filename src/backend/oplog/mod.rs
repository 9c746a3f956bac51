//! Operation Log Module
//!
//! The durable, ordered log of committed commands per document.
//!
//! # Architecture
//!
//! - **`store`** - `LogStore` trait and the in-memory store
//! - **`pg_store`** - Postgres store
//! - **`service`** - `OpLogService`: locked commit and lock-free pull

/// Log store trait and in-memory store
pub mod store;

/// Postgres log store
pub mod pg_store;

/// Commit and pull
pub mod service;

pub use pg_store::PgLogStore;
pub use service::{CommitOutcome, OpLogConfig, OpLogService};
pub use store::{AppendError, InMemoryLogStore, LogStore, SharedLogStore};
