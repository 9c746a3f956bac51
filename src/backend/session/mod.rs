//! Connection sessions
//!
//! - **`client`** - the per-connection multiplexer
//! - **`channel`** - the `ChannelHandler` seam and its build outcome
//! - **`channels`** - one handler per logical channel
//! - **`outbox`** - the outbound envelope queue
//! - **`task`** - closable background tasks of handlers
//! - **`ws`** - the websocket route

pub mod channel;
pub mod channels;
pub mod client;
pub mod outbox;
pub mod task;
pub mod ws;

pub use channel::{ChannelBuild, ChannelContext, ChannelHandler};
pub use client::{SessionEnd, SyncSession};
pub use outbox::Outbox;
pub use ws::ws_handler;
