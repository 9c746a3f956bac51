//! Versioning Module
//!
//! Periodic folding of the operation log into stored snapshots.
//!
//! # Architecture
//!
//! - **`store`** - `VersionStore`: materialized version pointers
//! - **`generator`** - `SnapshotGenerator`: the external snapshot service
//! - **`trigger`** - `MaterializationTrigger`: rate-limited, fired after commits

/// Version pointers
pub mod store;

/// Snapshot service client
pub mod generator;

/// Materialization trigger
pub mod trigger;

pub use generator::{GeneratedSnapshot, HttpSnapshotGenerator, SharedGenerator, SnapshotGenerator, SnapshotRequest};
pub use store::{InMemoryVersionStore, PgVersionStore, SharedVersions, VersionStore};
pub use trigger::{MaterializationTrigger, TriggerConfig, TriggerDeps, TriggerOutcome};
