/**
 * Operation Log Service
 *
 * Commit and pull for one document's operation log.
 *
 * # Commit
 *
 * Commits to one document are serialized by the op mutex, so version
 * numbers form one gap-free sequence no matter which process commits. Inside
 * the lock:
 *
 * 1. Resolve the previous version from the counter cache, or from the store
 *    when the cache is cold.
 * 2. Number the batch on top of it.
 * 3. Delete the cached counter.
 * 4. Append the batch atomically.
 * 5. On success, cache the new head and publish the batch.
 *
 * The counter is deleted before the append and only written after it
 * succeeds. A failed append leaves the cache empty, never stale.
 *
 * # Pull
 *
 * A lock-free range read from the store.
 */

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::coordination::{keys, DistributedMutex, SharedCacheRef, SharedLocks};
use crate::backend::error::{BackendError, BackendResult};
use crate::backend::oplog::store::{AppendError, SharedLogStore};
use crate::backend::realtime::{topics, SharedBus};
use crate::backend::versioning::MaterializationTrigger;
use crate::shared::config::SyncConfig;
use crate::shared::{Cmd, CmdItem, PermType};

/// Lock and cache timings of the service
#[derive(Debug, Clone)]
pub struct OpLogConfig {
    /// Lease of the op mutex
    pub lock_ttl: Duration,
    /// How long a commit waits for the op mutex
    pub lock_wait: Duration,
    /// Lifetime of the cached version counter
    pub cache_ttl: Duration,
}

impl From<&SyncConfig> for OpLogConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            lock_ttl: config.lock_ttl(),
            lock_wait: config.lock_wait(),
            cache_ttl: config.version_cache_ttl(),
        }
    }
}

impl Default for OpLogConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

/// Result of an accepted commit request
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// The batch was appended with these versions
    Committed(Vec<CmdItem>),
    /// A command of the batch was already committed; this is its entry
    Duplicate(CmdItem),
}

/// Commit and pull over the shared stores
pub struct OpLogService {
    store: SharedLogStore,
    cache: SharedCacheRef,
    locks: SharedLocks,
    bus: SharedBus,
    materializer: Option<Arc<MaterializationTrigger>>,
    config: OpLogConfig,
}

impl OpLogService {
    pub fn new(
        store: SharedLogStore,
        cache: SharedCacheRef,
        locks: SharedLocks,
        bus: SharedBus,
        config: OpLogConfig,
    ) -> Self {
        Self {
            store,
            cache,
            locks,
            bus,
            materializer: None,
            config,
        }
    }

    /// Fire this trigger after every successful commit
    pub fn with_materializer(mut self, trigger: Arc<MaterializationTrigger>) -> Self {
        self.materializer = Some(trigger);
        self
    }

    pub fn store(&self) -> &SharedLogStore {
        &self.store
    }

    /// Commit a batch for `user_id`
    ///
    /// # Errors
    ///
    /// - `PermissionDenied` below `Editable`
    /// - `ProtocolError` for an empty batch, a blank command id, or a command
    ///   id repeated inside the batch
    /// - `LockUnavailable` (retryable) when the op mutex is not acquired in
    ///   time; nothing is touched in that case
    /// - store errors for any other append failure
    pub async fn commit(
        &self,
        document_id: &str,
        user_id: &str,
        perm: PermType,
        cmds: Vec<Cmd>,
    ) -> BackendResult<CommitOutcome> {
        if !perm.can_edit() {
            return Err(BackendError::permission_denied(format!(
                "commit requires edit permission on {}",
                document_id
            )));
        }
        validate_batch(&cmds)?;

        let mutex = DistributedMutex::new(self.locks.clone(), keys::op_mutex(document_id), self.config.lock_ttl)
            .with_wait(self.config.lock_wait);
        let guard = mutex.lock().await?;

        let result = self.commit_locked(document_id, user_id, cmds).await;
        guard.release().await;

        if let (Ok(CommitOutcome::Committed(_)), Some(trigger)) = (&result, &self.materializer) {
            trigger.spawn_fire(document_id);
        }
        result
    }

    async fn commit_locked(&self, document_id: &str, user_id: &str, cmds: Vec<Cmd>) -> BackendResult<CommitOutcome> {
        let previous_id = self.previous_id(document_id).await?;
        let items = CmdItem::number_batch(document_id, user_id, previous_id, cmds);

        let counter_key = keys::last_cmd_ver_id(document_id);
        self.cache.delete(&counter_key).await?;

        match self.store.append(&items).await {
            Ok(()) => {}
            Err(AppendError::DuplicateCmd { cmd_id }) => {
                let existing = self
                    .store
                    .find_by_cmd_id(document_id, &cmd_id)
                    .await?
                    .ok_or_else(|| BackendError::store(format!("duplicate command {} not found", cmd_id)))?;
                tracing::info!(%document_id, %cmd_id, ver_id = existing.ver_id, "duplicate commit");
                return Ok(CommitOutcome::Duplicate(existing));
            }
            Err(AppendError::VersionConflict { ver_id }) => {
                return Err(BackendError::store(format!(
                    "version {} of {} already assigned",
                    ver_id, document_id
                )));
            }
            Err(AppendError::Store(err)) => return Err(err),
        }

        let head = previous_id + items.len() as u64;
        if let Err(err) = self.cache.set(&counter_key, head.to_string(), self.config.cache_ttl).await {
            tracing::warn!(%document_id, error = %err, "failed to cache version counter");
        }

        match serde_json::to_string(&items) {
            Ok(payload) => {
                if let Err(err) = self.bus.publish(&topics::operations(document_id), payload).await {
                    tracing::warn!(%document_id, error = %err, "failed to publish committed batch");
                }
            }
            Err(err) => tracing::error!(%document_id, error = %err, "failed to encode committed batch"),
        }

        tracing::debug!(%document_id, user_id, from = previous_id + 1, to = head, "batch committed");
        Ok(CommitOutcome::Committed(items))
    }

    /// Head version before this commit; the store is authoritative
    async fn previous_id(&self, document_id: &str) -> BackendResult<u64> {
        match self.cache.get(&keys::last_cmd_ver_id(document_id)).await {
            Ok(Some(value)) => match value.parse::<u64>() {
                Ok(previous_id) => return Ok(previous_id),
                Err(_) => {
                    tracing::warn!(%document_id, %value, "ignoring malformed version counter");
                }
            },
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(%document_id, error = %err, "version counter unavailable, reading store");
            }
        }
        self.store.last_ver_id(document_id).await
    }

    /// Items with `from <= ver_id <= to`, ascending; `to == 0` reads to the end
    pub async fn pull(&self, document_id: &str, from: u64, to: u64) -> BackendResult<Vec<CmdItem>> {
        let to = (to != 0).then_some(to);
        if to.is_some_and(|to| to < from) {
            return Ok(Vec::new());
        }
        self.store.range(document_id, from, to).await
    }
}

fn validate_batch(cmds: &[Cmd]) -> BackendResult<()> {
    if cmds.is_empty() {
        return Err(BackendError::protocol("commit batch is empty"));
    }
    let mut seen = HashSet::new();
    for cmd in cmds {
        if cmd.id.trim().is_empty() {
            return Err(BackendError::protocol("command id is empty"));
        }
        if !seen.insert(cmd.id.as_str()) {
            return Err(BackendError::protocol(format!("command {} repeated in batch", cmd.id)));
        }
    }
    Ok(())
}
