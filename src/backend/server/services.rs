/**
 * Service Container
 *
 * All shared clients are built once at startup and handed to sessions by
 * reference. Nothing in the sync core reaches for a global.
 *
 * # Layers
 *
 * - `Backends` - the raw seams (stores, cache, locks, bus, collaborators)
 * - `SyncServices` - the services composed from them, as sessions use them
 *
 * Tests build `Backends` from in-memory parts, or share one set of backends
 * between several `SyncServices` to stand in for several processes.
 */

use std::sync::Arc;

use sqlx::PgPool;

use crate::backend::coordination::{
    InMemoryCache, InMemoryLockService, PgCache, PgLockService, SharedCacheRef, SharedLocks,
};
use crate::backend::directory::{
    BlobDocumentUploader, FsBlobStorage, InMemoryBlobStorage, JwtCredentialIssuer, PgDirectory,
    SharedBlobs, SharedCredentials, SharedDirectory, SharedPermissions, SharedUploader, StaticDirectory,
};
use crate::backend::error::BackendResult;
use crate::backend::oplog::{InMemoryLogStore, OpLogConfig, OpLogService, PgLogStore, SharedLogStore};
use crate::backend::presence::PresenceService;
use crate::backend::realtime::{InMemoryBus, PgFanoutBus, SharedBus};
use crate::backend::versioning::{
    HttpSnapshotGenerator, InMemoryVersionStore, MaterializationTrigger, PgVersionStore, SharedGenerator,
    SharedVersions, TriggerConfig, TriggerDeps,
};
use crate::shared::config::{AppConfig, SyncConfig};

/// Concrete backends that need periodic housekeeping
#[derive(Clone, Default)]
pub struct Housekeeping {
    pub memory_cache: Option<Arc<InMemoryCache>>,
    pub memory_bus: Option<Arc<InMemoryBus>>,
    pub pg_cache: Option<Arc<PgCache>>,
    pub pg_bus: Option<Arc<PgFanoutBus>>,
}

impl Housekeeping {
    /// Drop expired cache rows, old spill rows and idle local topics
    pub async fn run_once(&self, spill_age: std::time::Duration) {
        if let Some(cache) = &self.memory_cache {
            let purged = cache.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "purged expired cache entries");
            }
        }
        if let Some(cache) = &self.pg_cache {
            if let Err(err) = cache.prune_expired().await {
                tracing::warn!(error = %err, "failed to prune expired cache rows");
            }
        }
        if let Some(bus) = &self.pg_bus {
            if let Err(err) = bus.prune_spill(spill_age).await {
                tracing::warn!(error = %err, "failed to prune fanout spill rows");
            }
            bus.local().cleanup_inactive_channels();
        }
        if let Some(bus) = &self.memory_bus {
            let removed = bus.cleanup_inactive_channels();
            if removed > 0 {
                tracing::debug!(removed, "cleaned up inactive fanout topics");
            }
        }
    }
}

/// The shared seams of the sync core
#[derive(Clone)]
pub struct Backends {
    pub store: SharedLogStore,
    pub cache: SharedCacheRef,
    pub locks: SharedLocks,
    pub bus: SharedBus,
    pub versions: SharedVersions,
    pub directory: SharedDirectory,
    pub permissions: SharedPermissions,
    pub credentials: SharedCredentials,
    pub blobs: SharedBlobs,
    pub uploader: SharedUploader,
    pub generator: Option<SharedGenerator>,
    pub housekeeping: Housekeeping,
}

fn generator_from(config: &AppConfig) -> BackendResult<Option<SharedGenerator>> {
    match &config.versioning.generator_url {
        Some(url) if !url.is_empty() => {
            let generator = HttpSnapshotGenerator::new(url.clone(), config.versioning.request_timeout())?;
            tracing::info!(url = %url, "snapshot generator configured");
            Ok(Some(Arc::new(generator)))
        }
        _ => {
            tracing::info!("no snapshot generator configured, materialization disabled");
            Ok(None)
        }
    }
}

impl Backends {
    /// Single-process backends over `directory`, with blobs in memory
    pub fn in_memory(directory: Arc<StaticDirectory>, config: &AppConfig) -> Self {
        let cache = Arc::new(InMemoryCache::new());
        let bus = Arc::new(InMemoryBus::new());
        let blobs: SharedBlobs = Arc::new(InMemoryBlobStorage::new());
        Self {
            store: Arc::new(InMemoryLogStore::new()),
            cache: cache.clone(),
            locks: Arc::new(InMemoryLockService::new()),
            bus: bus.clone(),
            versions: Arc::new(InMemoryVersionStore::new()),
            directory: directory.clone(),
            permissions: directory,
            credentials: Arc::new(JwtCredentialIssuer::new(&config.storage)),
            uploader: Arc::new(BlobDocumentUploader::new(blobs.clone())),
            blobs,
            generator: None,
            housekeeping: Housekeeping {
                memory_cache: Some(cache),
                memory_bus: Some(bus),
                ..Housekeeping::default()
            },
        }
    }

    /// Single-process backends with blobs on disk and the configured generator
    pub fn local(config: &AppConfig) -> BackendResult<Self> {
        let mut backends = Self::in_memory(Arc::new(StaticDirectory::new()), config);
        let blobs: SharedBlobs = Arc::new(FsBlobStorage::new(&config.storage.root));
        backends.uploader = Arc::new(BlobDocumentUploader::new(blobs.clone()));
        backends.blobs = blobs;
        backends.generator = generator_from(config)?;
        Ok(backends)
    }

    /// Backends shared by every process through Postgres
    pub async fn postgres(pool: PgPool, config: &AppConfig) -> BackendResult<Self> {
        let cache = Arc::new(PgCache::new(pool.clone()));
        let bus = Arc::new(PgFanoutBus::start(pool.clone()).await?);
        let directory = Arc::new(PgDirectory::new(pool.clone()));
        let blobs: SharedBlobs = Arc::new(FsBlobStorage::new(&config.storage.root));
        Ok(Self {
            store: Arc::new(PgLogStore::new(pool.clone())),
            cache: cache.clone(),
            locks: Arc::new(PgLockService::new(pool.clone())),
            bus: bus.clone(),
            versions: Arc::new(PgVersionStore::new(pool)),
            directory: directory.clone(),
            permissions: directory,
            credentials: Arc::new(JwtCredentialIssuer::new(&config.storage)),
            uploader: Arc::new(BlobDocumentUploader::new(blobs.clone())),
            blobs,
            generator: generator_from(config)?,
            housekeeping: Housekeeping {
                pg_cache: Some(cache),
                pg_bus: Some(bus),
                ..Housekeeping::default()
            },
        })
    }
}

/// Services a sync session works with
#[derive(Clone)]
pub struct SyncServices {
    pub oplog: Arc<OpLogService>,
    pub presence: PresenceService,
    pub materializer: Option<Arc<MaterializationTrigger>>,
    pub bus: SharedBus,
    pub versions: SharedVersions,
    pub directory: SharedDirectory,
    pub permissions: SharedPermissions,
    pub credentials: SharedCredentials,
    pub blobs: SharedBlobs,
    pub uploader: SharedUploader,
    pub sync: SyncConfig,
    pub housekeeping: Housekeeping,
}

impl SyncServices {
    /// Compose services from backends
    pub fn assemble(backends: Backends, config: &AppConfig) -> Self {
        let materializer = backends.generator.clone().map(|generator| {
            Arc::new(MaterializationTrigger::new(
                TriggerDeps {
                    store: backends.store.clone(),
                    cache: backends.cache.clone(),
                    locks: backends.locks.clone(),
                    bus: backends.bus.clone(),
                    versions: backends.versions.clone(),
                    directory: backends.directory.clone(),
                    generator,
                },
                TriggerConfig::from(&config.versioning),
            ))
        });

        let mut oplog = OpLogService::new(
            backends.store.clone(),
            backends.cache.clone(),
            backends.locks.clone(),
            backends.bus.clone(),
            OpLogConfig::from(&config.sync),
        );
        if let Some(trigger) = &materializer {
            oplog = oplog.with_materializer(trigger.clone());
        }

        let presence = PresenceService::new(backends.cache.clone(), backends.bus.clone(), config.sync.presence_ttl());

        Self {
            oplog: Arc::new(oplog),
            presence,
            materializer,
            bus: backends.bus,
            versions: backends.versions,
            directory: backends.directory,
            permissions: backends.permissions,
            credentials: backends.credentials,
            blobs: backends.blobs,
            uploader: backends.uploader,
            sync: config.sync.clone(),
            housekeeping: backends.housekeeping,
        }
    }
}
