//! Outbound envelope queue of one connection
//!
//! Every writer of a session (the read loop, channel handlers, relay tasks)
//! sends through a cloned `Outbox`. One writer task drains the receiving
//! end into the socket, so envelopes never interleave mid-frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::backend::error::{BackendError, BackendResult};
use crate::shared::{DataType, TransData};

/// Sending half of a connection's envelope queue
#[derive(Clone)]
pub struct Outbox {
    sender: mpsc::Sender<TransData>,
    next_id: Arc<AtomicU64>,
}

impl Outbox {
    /// Create a bounded queue
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TransData>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let outbox = Self {
            sender,
            next_id: Arc::new(AtomicU64::new(0)),
        };
        (outbox, receiver)
    }

    /// Correlation id for a server-initiated push: `s1`, `s2`, ...
    pub fn next_server_id(&self) -> String {
        format!("s{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Queue an envelope, waiting while the queue is full
    ///
    /// # Errors
    ///
    /// `StateError` once the connection's writer is gone.
    pub async fn send(&self, data: TransData) -> BackendResult<()> {
        self.sender
            .send(data)
            .await
            .map_err(|_| BackendError::state("connection closed"))
    }

    /// Queue a server push on a channel
    pub async fn push(&self, data_type: DataType, data: impl Into<String>) -> BackendResult<()> {
        let envelope = TransData::new(data_type, self.next_server_id(), data);
        self.send(envelope).await
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
