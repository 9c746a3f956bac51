//! Presence Module
//!
//! Ephemeral cursor and selection state of the participants of a document.
//! The `selection` channel of a session seeds, updates and clears it
//! through `PresenceService`.

/// Presence records and events
pub mod service;

pub use service::PresenceService;
