//! Coordination Module
//!
//! Shared state that every process must agree on: distributed lease locks
//! and the cache cells that hold the version counter hint, presence records
//! and materialization timestamps.
//!
//! # Architecture
//!
//! - **`keys`** - Names of locks and cache cells
//! - **`lock`** - `LockService`, `DistributedMutex` and `LockGuard`
//! - **`cache`** - `SharedCache` with scalar cells and per-field TTL hashes
//! - **`postgres`** - Postgres implementations of both
//!
//! No in-process lock can stand in for these: sessions for the same
//! document may live in different processes.

/// Lock and cache key naming
pub mod keys;

/// Lease locks
pub mod lock;

/// Shared cache
pub mod cache;

/// Postgres implementations
pub mod postgres;

pub use cache::{InMemoryCache, SharedCache, SharedCacheRef};
pub use lock::{DistributedMutex, InMemoryLockService, LockGuard, LockService, SharedLocks};
pub use postgres::{PgCache, PgLockService};
