/**
 * Postgres Fanout Bus
 *
 * Cross-process fanout over `LISTEN/NOTIFY`.
 *
 * # Flow
 *
 * 1. `publish` sends `pg_notify` on one shared channel with a JSON envelope
 *    `{topic, payload}`.
 * 2. Every process runs one listener task on that channel.
 * 3. The listener hands each notification to its local `InMemoryBus`, which
 *    delivers it to the subscribers of that process.
 *
 * The publishing process receives its own notification through the same
 * listener, so local subscribers are reached exactly once.
 *
 * # Large Payloads
 *
 * Notification payloads are limited to 8000 bytes. Larger envelopes are
 * written to `sync_fanout_spill` and the notification carries the row id.
 * Spill rows are pruned by the maintenance task.
 */

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::task::JoinHandle;

use crate::backend::error::{BackendError, BackendResult};
use crate::backend::realtime::bus::{FanoutBus, InMemoryBus, Subscription};
use crate::backend::realtime::topics::Topic;

/// Notification channel shared by all processes
pub const NOTIFY_CHANNEL: &str = "xfsync_fanout";

/// Largest envelope sent inline, below the server's 8000 byte limit
const INLINE_PAYLOAD_LIMIT: usize = 7_000;

#[derive(Debug, Serialize, Deserialize)]
struct NotifyEnvelope {
    topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    spill_id: Option<i64>,
}

/// Fanout bus backed by Postgres notifications
pub struct PgFanoutBus {
    pool: PgPool,
    local: Arc<InMemoryBus>,
    listener_task: JoinHandle<()>,
}

impl PgFanoutBus {
    /// Connect the listener and start relaying notifications
    pub async fn start(pool: PgPool) -> BackendResult<Self> {
        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(NOTIFY_CHANNEL).await?;
        tracing::info!(channel = NOTIFY_CHANNEL, "fanout listener connected");

        let local = Arc::new(InMemoryBus::new());
        let listener_task = tokio::spawn(run_listener(listener, pool.clone(), local.clone()));

        Ok(Self {
            pool,
            local,
            listener_task,
        })
    }

    /// Local delivery stage, for maintenance
    pub fn local(&self) -> &Arc<InMemoryBus> {
        &self.local
    }

    /// Delete spill rows older than `age`
    pub async fn prune_spill(&self, age: Duration) -> BackendResult<u64> {
        let result = sqlx::query(
            "DELETE FROM sync_fanout_spill WHERE created_at < NOW() - make_interval(secs => $1)",
        )
        .bind(age.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

impl Drop for PgFanoutBus {
    fn drop(&mut self) {
        self.listener_task.abort();
    }
}

#[async_trait]
impl FanoutBus for PgFanoutBus {
    async fn publish(&self, topic: &Topic, payload: String) -> BackendResult<()> {
        let inline = NotifyEnvelope {
            topic: topic.as_str().to_string(),
            payload: Some(payload),
            spill_id: None,
        };
        let mut message = serde_json::to_string(&inline)?;

        if message.len() > INLINE_PAYLOAD_LIMIT {
            let payload = inline.payload.unwrap_or_default();
            let spill_id: i64 = sqlx::query_scalar(
                "INSERT INTO sync_fanout_spill (payload) VALUES ($1) RETURNING id",
            )
            .bind(&payload)
            .fetch_one(&self.pool)
            .await?;
            message = serde_json::to_string(&NotifyEnvelope {
                topic: inline.topic,
                payload: None,
                spill_id: Some(spill_id),
            })?;
            tracing::debug!(topic = %topic, spill_id, bytes = payload.len(), "payload spilled");
        }

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(&message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &Topic) -> BackendResult<Subscription> {
        self.local.subscribe(topic).await
    }
}

async fn run_listener(mut listener: PgListener, pool: PgPool, local: Arc<InMemoryBus>) {
    loop {
        match listener.recv().await {
            Ok(notification) => match decode_notification(notification.payload(), &pool).await {
                Ok((topic, payload)) => {
                    local.deliver(&topic, Arc::from(payload));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "dropping undecodable fanout notification");
                }
            },
            Err(err) => {
                // recv reconnects on the next call
                tracing::error!(error = %err, "fanout listener error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn decode_notification(raw: &str, pool: &PgPool) -> BackendResult<(Topic, String)> {
    let envelope: NotifyEnvelope = serde_json::from_str(raw)?;
    let payload = match (envelope.payload, envelope.spill_id) {
        (Some(payload), _) => payload,
        (None, Some(spill_id)) => {
            sqlx::query_scalar::<_, String>("SELECT payload FROM sync_fanout_spill WHERE id = $1")
                .bind(spill_id)
                .fetch_optional(pool)
                .await?
                .ok_or_else(|| BackendError::store(format!("spill row {} is gone", spill_id)))?
        }
        (None, None) => return Err(BackendError::protocol("notification without payload")),
    };
    Ok((Topic::from_raw(envelope.topic), payload))
}
