//! Real-time Fanout Module
//!
//! This module relays events between sessions. A session subscribes to the
//! topics of its bound document and forwards what arrives to its client;
//! services publish to the same topics after a commit, a presence change or
//! a materialization.
//!
//! # Architecture
//!
//! - **`topics`** - Topic naming, one function per entity kind
//! - **`bus`** - `FanoutBus` trait, `Subscription` and the in-memory bus
//! - **`pg_bus`** - Cross-process bus over Postgres `LISTEN/NOTIFY`
//!
//! # Module Structure
//!
//! ```text
//! realtime/
//! ├── mod.rs     - Module exports and documentation
//! ├── topics.rs  - Topic naming
//! ├── bus.rs     - Bus trait and in-memory implementation
//! └── pg_bus.rs  - Postgres implementation
//! ```

/// Topic naming
pub mod topics;

/// Bus trait and in-memory implementation
pub mod bus;

/// Postgres implementation
pub mod pg_bus;

pub use bus::{FanoutBus, InMemoryBus, SharedBus, Subscription};
pub use pg_bus::PgFanoutBus;
pub use topics::{Topic, TopicKind};
