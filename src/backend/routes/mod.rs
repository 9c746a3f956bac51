//! Route Configuration Module
//!
//! The HTTP surface of the server is small: one websocket route carrying
//! the sync protocol and one health route.
//!
//! - **`router`** - Main router creation

/// Main router creation
pub mod router;

pub use router::create_router;
