/**
 * Fanout Bus
 *
 * Publish/subscribe between every session that has a client on a document,
 * whichever process holds the connection.
 *
 * # Delivery
 *
 * Delivery is at-most-once and best-effort. A subscriber only sees messages
 * published while it is subscribed; there is no replay. Durability of
 * operations comes from the log store and the pull path, never from the bus.
 * Messages on one topic arrive in publish order as far as the transport
 * preserves it. There is no ordering across topics.
 *
 * # Implementations
 *
 * - `InMemoryBus` - one broadcast channel per topic, for tests and for a
 *   single-process deployment. It is also the local delivery stage of the
 *   Postgres bus.
 * - `PgFanoutBus` (see `pg_bus`) - `LISTEN/NOTIFY` across processes.
 */

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::backend::error::BackendResult;
use crate::backend::realtime::topics::Topic;

/// Default capacity of a topic channel before slow subscribers lag
pub const DEFAULT_TOPIC_CAPACITY: usize = 256;

/// Publish/subscribe medium shared by all sessions
#[async_trait]
pub trait FanoutBus: Send + Sync {
    /// Publish a payload to every current subscriber of `topic`
    async fn publish(&self, topic: &Topic, payload: String) -> BackendResult<()>;

    /// Subscribe to `topic`; messages published after this call are delivered
    async fn subscribe(&self, topic: &Topic) -> BackendResult<Subscription>;
}

/// Shared handle to a bus implementation
pub type SharedBus = Arc<dyn FanoutBus>;

/// An active subscription to one topic
///
/// Dropping the subscription unsubscribes.
pub struct Subscription {
    topic: Topic,
    receiver: broadcast::Receiver<Arc<str>>,
}

impl Subscription {
    pub fn new(topic: Topic, receiver: broadcast::Receiver<Arc<str>>) -> Self {
        Self { topic, receiver }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Wait for the next message
    ///
    /// Returns `None` once the topic is gone. A subscriber that fell behind
    /// skips the overwritten messages and keeps receiving.
    pub async fn next(&mut self) -> Option<Arc<str>> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Some(payload),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %self.topic, skipped, "subscriber lagged, messages dropped");
                    continue;
                }
                Err(RecvError::Closed) => {
                    tracing::debug!(topic = %self.topic, "topic closed, ending subscription");
                    return None;
                }
            }
        }
    }
}

/// In-process bus with one broadcast channel per topic
pub struct InMemoryBus {
    channels: Mutex<HashMap<Topic, broadcast::Sender<Arc<str>>>>,
    capacity: usize,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<Topic, broadcast::Sender<Arc<str>>>> {
        self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get or create the sender of a topic
    pub fn get_sender(&self, topic: &Topic) -> broadcast::Sender<Arc<str>> {
        let mut channels = self.channels();
        channels
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Deliver to local subscribers; returns how many received the message
    pub fn deliver(&self, topic: &Topic, payload: Arc<str>) -> usize {
        let sender = self.channels().get(topic).cloned();
        match sender {
            Some(sender) => sender.send(payload).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop topics nobody listens to
    pub fn cleanup_inactive_channels(&self) -> usize {
        let mut channels = self.channels();
        let before = channels.len();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        before - channels.len()
    }

    /// Get subscriber count for a topic
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.channels()
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl FanoutBus for InMemoryBus {
    async fn publish(&self, topic: &Topic, payload: String) -> BackendResult<()> {
        let delivered = self.deliver(topic, Arc::from(payload));
        tracing::trace!(topic = %topic, delivered, "published");
        Ok(())
    }

    async fn subscribe(&self, topic: &Topic) -> BackendResult<Subscription> {
        let receiver = self.get_sender(topic).subscribe();
        Ok(Subscription::new(topic.clone(), receiver))
    }
}
