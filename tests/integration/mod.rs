//! Integration tests
//!
//! Sessions, the op log, presence and versioning over in-memory backends,
//! and the websocket route over a real listener.

mod oplog_test;
mod presence_test;
mod session_test;
mod versioning_test;
mod ws_test;
