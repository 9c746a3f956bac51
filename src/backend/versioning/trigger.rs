/**
 * Version Materialization Trigger
 *
 * Fired after every successful commit. Most firings do nothing: a
 * snapshot is produced at most once per `min_interval` per document, across
 * all processes.
 *
 * # Gates
 *
 * 1. Local throttle - the last attempt in this process is too recent.
 * 2. Version mutex - another process is already materializing. The local
 *    timestamp is bumped so this process backs off.
 * 3. Shared timestamp - some process materialized within the interval.
 * 4. Pending range - fewer than `min_cmd_count` commands since the last
 *    version.
 *
 * Past the gates the generator is called once. A failure is logged and not
 * retried; the next commit fires again once the interval has passed.
 */

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::backend::coordination::{keys, DistributedMutex, SharedCacheRef, SharedLocks};
use crate::backend::directory::SharedDirectory;
use crate::backend::error::{BackendError, BackendResult};
use crate::backend::oplog::store::SharedLogStore;
use crate::backend::realtime::{topics, SharedBus};
use crate::backend::versioning::generator::{SharedGenerator, SnapshotRequest};
use crate::backend::versioning::store::SharedVersions;
use crate::shared::config::VersioningConfig;
use crate::shared::{DocumentVersion, VersionChangedEvent};

/// How long the shared last-update timestamp is kept
const LAST_UPDATE_TTL: Duration = Duration::from_secs(60 * 60);

/// Trigger tuning
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub min_interval: Duration,
    pub min_cmd_count: usize,
    pub lock_ttl: Duration,
    pub last_update_ttl: Duration,
}

impl From<&VersioningConfig> for TriggerConfig {
    fn from(config: &VersioningConfig) -> Self {
        Self {
            min_interval: config.min_update_interval(),
            min_cmd_count: config.min_cmd_count,
            lock_ttl: config.lock_ttl(),
            last_update_ttl: LAST_UPDATE_TTL.max(config.min_update_interval()),
        }
    }
}

/// Result of one firing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// This process attempted recently
    Throttled,
    /// Another process holds the version mutex
    Busy,
    /// Some process materialized within the interval
    RecentlyMaterialized,
    /// Too few commands since the last version
    NotEnoughOps { pending: usize },
    Materialized(DocumentVersion),
    /// The attempt failed; details are logged
    Failed,
}

/// Services the trigger reads and writes
#[derive(Clone)]
pub struct TriggerDeps {
    pub store: SharedLogStore,
    pub cache: SharedCacheRef,
    pub locks: SharedLocks,
    pub bus: SharedBus,
    pub versions: SharedVersions,
    pub directory: SharedDirectory,
    pub generator: SharedGenerator,
}

/// Rate-limited snapshot trigger
pub struct MaterializationTrigger {
    deps: TriggerDeps,
    config: TriggerConfig,
    last_attempt: Mutex<HashMap<String, Instant>>,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl MaterializationTrigger {
    pub fn new(deps: TriggerDeps, config: TriggerConfig) -> Self {
        Self {
            deps,
            config,
            last_attempt: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    /// Fire in the background
    pub fn spawn_fire(self: &Arc<Self>, document_id: &str) {
        let trigger = Arc::clone(self);
        let document_id = document_id.to_string();
        tokio::spawn(async move {
            let outcome = trigger.fire(&document_id).await;
            tracing::debug!(%document_id, ?outcome, "materialization trigger finished");
        });
    }

    fn recently_attempted(&self, document_id: &str) -> bool {
        let attempts = self.last_attempt.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        attempts
            .get(document_id)
            .is_some_and(|at| at.elapsed() < self.config.min_interval)
    }

    fn mark_attempted(&self, document_id: &str) {
        let mut attempts = self.last_attempt.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        attempts.insert(document_id.to_string(), Instant::now());
    }

    /// Run the gates and, past them, materialize once
    pub async fn fire(&self, document_id: &str) -> TriggerOutcome {
        if self.recently_attempted(document_id) {
            return TriggerOutcome::Throttled;
        }

        let mutex = DistributedMutex::new(
            self.deps.locks.clone(),
            keys::version_mutex(document_id),
            self.config.lock_ttl,
        );
        let guard = match mutex.try_lock().await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                self.mark_attempted(document_id);
                return TriggerOutcome::Busy;
            }
            Err(err) => {
                tracing::warn!(%document_id, error = %err, "version mutex unavailable");
                self.mark_attempted(document_id);
                return TriggerOutcome::Busy;
            }
        };

        let outcome = if self.recently_materialized(document_id).await {
            TriggerOutcome::RecentlyMaterialized
        } else {
            let outcome = match self.materialize(document_id).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(%document_id, error = %err, "materialization failed");
                    TriggerOutcome::Failed
                }
            };
            self.mark_attempted(document_id);
            outcome
        };

        guard.release().await;
        outcome
    }

    async fn recently_materialized(&self, document_id: &str) -> bool {
        let key = keys::version_last_update(document_id);
        match self.deps.cache.get(&key).await {
            Ok(Some(value)) => match value.parse::<i64>() {
                Ok(at) => {
                    let interval = i64::try_from(self.config.min_interval.as_millis()).unwrap_or(i64::MAX);
                    now_millis().saturating_sub(at) < interval
                }
                Err(_) => false,
            },
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(%document_id, error = %err, "failed to read last materialization time");
                false
            }
        }
    }

    async fn materialize(&self, document_id: &str) -> BackendResult<TriggerOutcome> {
        let document_info = self
            .deps
            .directory
            .document(document_id)
            .await?
            .ok_or_else(|| BackendError::not_found(document_id))?;

        let last_version = self.deps.versions.latest(document_id).await?;
        let start = last_version
            .as_ref()
            .map(|version| version.last_cmd_ver_id)
            .unwrap_or(0)
            + 1;

        let cmd_item_list = self.deps.store.range(document_id, start, None).await?;
        let Some(head) = cmd_item_list.last().map(|item| item.ver_id) else {
            return Ok(TriggerOutcome::NotEnoughOps { pending: 0 });
        };
        if cmd_item_list.len() < self.config.min_cmd_count {
            return Ok(TriggerOutcome::NotEnoughOps {
                pending: cmd_item_list.len(),
            });
        }

        tracing::info!(%document_id, from = start, to = head, "materializing document version");
        let request = SnapshotRequest {
            document_info,
            cmd_item_list,
            last_version,
        };
        let snapshot = self.deps.generator.generate(&request).await?;

        let version = DocumentVersion {
            document_id: document_id.to_string(),
            version_id: snapshot
                .version_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            last_cmd_ver_id: snapshot.last_cmd_ver_id.unwrap_or(head),
        };
        self.deps.versions.record(&version).await?;

        let event = VersionChangedEvent {
            document_id: document_id.to_string(),
            version_id: version.version_id.clone(),
            version_start_with: start,
            last_cmd_ver_id: version.last_cmd_ver_id,
        };
        if let Err(err) = self
            .deps
            .bus
            .publish(&topics::version_change(document_id), serde_json::to_string(&event)?)
            .await
        {
            tracing::warn!(%document_id, error = %err, "failed to publish version change");
        }

        self.deps
            .cache
            .set(
                &keys::version_last_update(document_id),
                now_millis().to_string(),
                self.config.last_update_ttl,
            )
            .await?;

        tracing::info!(%document_id, version_id = %version.version_id, "document version materialized");
        Ok(TriggerOutcome::Materialized(version))
    }
}
