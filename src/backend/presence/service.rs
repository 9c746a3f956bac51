/**
 * Presence Service
 *
 * Cursor and selection state per document, kept in a shared cache hash
 * with one field per user. Every field carries its own TTL, refreshed on
 * each update, so a participant whose process died disappears on its own.
 *
 * Changes are announced on the document's presence topic as `SelectionOp`
 * events: `update` with the full record, `exit` with the user id.
 */

use std::time::Duration;

use crate::backend::coordination::{keys, SharedCacheRef};
use crate::backend::error::BackendResult;
use crate::backend::realtime::{topics, SharedBus};
use crate::shared::{SelectionData, SelectionOp};

/// Presence records and events of all documents
#[derive(Clone)]
pub struct PresenceService {
    cache: SharedCacheRef,
    bus: SharedBus,
    ttl: Duration,
}

impl PresenceService {
    pub fn new(cache: SharedCacheRef, bus: SharedBus, ttl: Duration) -> Self {
        Self { cache, bus, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// All live records of a document, oldest participant first
    pub async fn snapshot(&self, document_id: &str) -> BackendResult<Vec<SelectionData>> {
        let fields = self.cache.hash_get_all(&keys::selection_data(document_id)).await?;
        let mut records: Vec<SelectionData> = fields
            .into_iter()
            .filter_map(|(user_id, value)| match serde_json::from_str(&value) {
                Ok(record) => Some(record),
                Err(err) => {
                    tracing::warn!(%document_id, %user_id, error = %err, "skipping malformed presence record");
                    None
                }
            })
            .collect();
        records.sort_by(|a, b| a.enter_time.cmp(&b.enter_time).then_with(|| a.user_id.cmp(&b.user_id)));
        Ok(records)
    }

    /// Store a record, refresh its TTL and announce it
    pub async fn update(&self, document_id: &str, data: &SelectionData) -> BackendResult<()> {
        let value = serde_json::to_string(data)?;
        self.cache
            .hash_set(&keys::selection_data(document_id), &data.user_id, value, self.ttl)
            .await?;
        let event = serde_json::to_string(&SelectionOp::update(data.clone()))?;
        self.bus.publish(&topics::presence(document_id), event).await
    }

    /// Remove a user's record and announce the exit
    pub async fn leave(&self, document_id: &str, user_id: &str) -> BackendResult<()> {
        let existed = self
            .cache
            .hash_delete(&keys::selection_data(document_id), user_id)
            .await?;
        if !existed {
            tracing::debug!(%document_id, user_id, "presence record already lapsed");
        }
        let event = serde_json::to_string(&SelectionOp::exit(user_id))?;
        self.bus.publish(&topics::presence(document_id), event).await
    }
}
