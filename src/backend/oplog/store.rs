/**
 * Operation Log Store
 *
 * The durable, append-only record of every committed `CmdItem`. It is the
 * source of truth for version numbers: caches may be missing, the store
 * never is.
 *
 * # Guarantees
 *
 * - `append` writes a whole batch or nothing.
 * - `(document_id, cmd_id)` is unique. A batch containing a known command
 *   id is rejected with `AppendError::DuplicateCmd` naming that id.
 * - `(document_id, ver_id)` is unique. A batch reusing a version is rejected
 *   with `AppendError::VersionConflict`.
 * - Entries are never updated or deleted.
 */

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;

use crate::backend::error::{BackendError, BackendResult};
use crate::shared::CmdItem;

/// Why an append was rejected
#[derive(Debug, Error)]
pub enum AppendError {
    /// A command id of the batch is already in the log
    #[error("command {cmd_id} already committed")]
    DuplicateCmd { cmd_id: String },

    /// A version number of the batch is already taken
    #[error("version {ver_id} already assigned")]
    VersionConflict { ver_id: u64 },

    /// Any other store failure
    #[error(transparent)]
    Store(#[from] BackendError),
}

impl From<sqlx::Error> for AppendError {
    fn from(err: sqlx::Error) -> Self {
        AppendError::Store(BackendError::from(err))
    }
}

/// Durable store of committed operations
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append a batch atomically; all items belong to one document
    async fn append(&self, items: &[CmdItem]) -> Result<(), AppendError>;

    /// Highest `ver_id` of a document, `0` for an empty log
    async fn last_ver_id(&self, document_id: &str) -> BackendResult<u64>;

    /// Items with `from <= ver_id` (and `ver_id <= to` when given), ascending
    async fn range(&self, document_id: &str, from: u64, to: Option<u64>) -> BackendResult<Vec<CmdItem>>;

    /// The item committed under a command id
    async fn find_by_cmd_id(&self, document_id: &str, cmd_id: &str) -> BackendResult<Option<CmdItem>>;
}

/// Shared handle to a log store
pub type SharedLogStore = Arc<dyn LogStore>;

#[derive(Default)]
struct DocumentLog {
    items: BTreeMap<u64, CmdItem>,
    cmd_ids: HashMap<String, u64>,
}

/// Log store for a single process
#[derive(Default)]
pub struct InMemoryLogStore {
    documents: Mutex<HashMap<String, DocumentLog>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn documents(&self) -> MutexGuard<'_, HashMap<String, DocumentLog>> {
        self.documents.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of entries of a document
    pub fn len(&self, document_id: &str) -> usize {
        self.documents()
            .get(document_id)
            .map(|log| log.items.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, document_id: &str) -> bool {
        self.len(document_id) == 0
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn append(&self, items: &[CmdItem]) -> Result<(), AppendError> {
        let Some(first) = items.first() else {
            return Ok(());
        };
        let mut documents = self.documents();
        let log = documents.entry(first.document_id.clone()).or_default();

        let mut batch_cmd_ids = HashSet::new();
        for item in items {
            if log.cmd_ids.contains_key(&item.cmd.id) || !batch_cmd_ids.insert(item.cmd.id.as_str()) {
                return Err(AppendError::DuplicateCmd {
                    cmd_id: item.cmd.id.clone(),
                });
            }
            if log.items.contains_key(&item.ver_id) {
                return Err(AppendError::VersionConflict { ver_id: item.ver_id });
            }
        }

        for item in items {
            log.cmd_ids.insert(item.cmd.id.clone(), item.ver_id);
            log.items.insert(item.ver_id, item.clone());
        }
        Ok(())
    }

    async fn last_ver_id(&self, document_id: &str) -> BackendResult<u64> {
        Ok(self
            .documents()
            .get(document_id)
            .and_then(|log| log.items.keys().next_back().copied())
            .unwrap_or(0))
    }

    async fn range(&self, document_id: &str, from: u64, to: Option<u64>) -> BackendResult<Vec<CmdItem>> {
        let upper = to.unwrap_or(u64::MAX);
        if upper < from {
            return Ok(Vec::new());
        }
        Ok(self
            .documents()
            .get(document_id)
            .map(|log| log.items.range(from..=upper).map(|(_, item)| item.clone()).collect())
            .unwrap_or_default())
    }

    async fn find_by_cmd_id(&self, document_id: &str, cmd_id: &str) -> BackendResult<Option<CmdItem>> {
        let documents = self.documents();
        Ok(documents.get(document_id).and_then(|log| {
            log.cmd_ids
                .get(cmd_id)
                .and_then(|ver_id| log.items.get(ver_id))
                .cloned()
        }))
    }
}
