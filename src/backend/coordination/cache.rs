/**
 * Shared Cache
 *
 * Low-latency key/value cells shared by all processes, with expiry.
 *
 * Two shapes are needed:
 *
 * - scalar cells, for the cached last version number of a document and the
 *   last materialization timestamp
 * - hashes with a TTL per field, for presence (one field per user, so one
 *   user's record can lapse while the others stay)
 *
 * Everything in the cache is a hint. Readers must be able to rebuild any
 * value from the durable stores when a cell is missing.
 */

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::backend::error::BackendResult;

/// Key/value cells with expiry
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> BackendResult<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> BackendResult<()>;

    async fn delete(&self, key: &str) -> BackendResult<()>;

    /// Set one field of a hash; the TTL applies to that field only
    async fn hash_set(&self, key: &str, field: &str, value: String, ttl: Duration) -> BackendResult<()>;

    /// Remove one field; returns whether it existed
    async fn hash_delete(&self, key: &str, field: &str) -> BackendResult<bool>;

    /// All live fields of a hash
    async fn hash_get_all(&self, key: &str) -> BackendResult<HashMap<String, String>>;
}

/// Shared handle to a cache implementation
pub type SharedCacheRef = Arc<dyn SharedCache>;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
struct CacheState {
    cells: HashMap<String, CacheEntry>,
    hashes: HashMap<String, HashMap<String, CacheEntry>>,
}

/// Cache for a single process
#[derive(Default)]
pub struct InMemoryCache {
    state: Mutex<CacheState>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop expired cells and fields; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state();
        let mut removed = 0;

        let before = state.cells.len();
        state.cells.retain(|_, entry| entry.is_live(now));
        removed += before - state.cells.len();

        for fields in state.hashes.values_mut() {
            let before = fields.len();
            fields.retain(|_, entry| entry.is_live(now));
            removed += before - fields.len();
        }
        state.hashes.retain(|_, fields| !fields.is_empty());
        removed
    }
}

#[async_trait]
impl SharedCache for InMemoryCache {
    async fn get(&self, key: &str) -> BackendResult<Option<String>> {
        let now = Instant::now();
        Ok(self
            .state()
            .cells
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> BackendResult<()> {
        self.state().cells.insert(key.to_string(), CacheEntry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.state().cells.remove(key);
        Ok(())
    }

    async fn hash_set(&self, key: &str, field: &str, value: String, ttl: Duration) -> BackendResult<()> {
        self.state()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), CacheEntry::new(value, ttl));
        Ok(())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> BackendResult<bool> {
        let now = Instant::now();
        let mut state = self.state();
        let removed = match state.hashes.get_mut(key) {
            Some(fields) => fields.remove(field).map(|entry| entry.is_live(now)).unwrap_or(false),
            None => false,
        };
        Ok(removed)
    }

    async fn hash_get_all(&self, key: &str) -> BackendResult<HashMap<String, String>> {
        let now = Instant::now();
        Ok(self
            .state()
            .hashes
            .get(key)
            .map(|fields| {
                fields
                    .iter()
                    .filter(|(_, entry)| entry.is_live(now))
                    .map(|(field, entry)| (field.clone(), entry.value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
