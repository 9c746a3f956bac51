/**
 * Documents and Permissions
 *
 * The sync core does not own documents or their access rules. It reads
 * them through two narrow interfaces:
 *
 * - `DocumentDirectory` - document metadata and administrative locks
 * - `PermissionResolver` - a user's effective level on a document
 *
 * `StaticDirectory` implements both in memory. It serves tests and
 * single-process deployments where documents are registered at startup.
 */

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::backend::error::BackendResult;
use crate::shared::{DocumentInfo, PermType};

/// Read access to document metadata
#[async_trait]
pub trait DocumentDirectory: Send + Sync {
    /// Metadata of a document, `None` if it does not exist
    async fn document(&self, document_id: &str) -> BackendResult<Option<DocumentInfo>>;

    /// Reasons the document is administratively locked; empty when it is not
    async fn locked_reasons(&self, document_id: &str) -> BackendResult<Vec<String>>;

    /// Account for bytes added to the document's assets
    async fn add_size(&self, document_id: &str, delta: i64) -> BackendResult<()>;
}

/// Effective permission of a user on a document
#[async_trait]
pub trait PermissionResolver: Send + Sync {
    async fn resolve(&self, document_id: &str, user_id: &str) -> BackendResult<PermType>;
}

pub type SharedDirectory = Arc<dyn DocumentDirectory>;
pub type SharedPermissions = Arc<dyn PermissionResolver>;

#[derive(Debug, Clone)]
struct DocumentRecord {
    info: DocumentInfo,
    grants: HashMap<String, PermType>,
    locked_reasons: Vec<String>,
}

/// In-memory documents and grants
#[derive(Default)]
pub struct StaticDirectory {
    records: RwLock<HashMap<String, DocumentRecord>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document; its owner gets `Editable`
    pub fn insert(&self, info: DocumentInfo) {
        let mut records = self.records.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut grants = HashMap::new();
        grants.insert(info.owner_id.clone(), PermType::Editable);
        records.insert(
            info.id.clone(),
            DocumentRecord {
                info,
                grants,
                locked_reasons: Vec::new(),
            },
        );
    }

    /// Grant a user a level on a document
    pub fn grant(&self, document_id: &str, user_id: &str, perm: PermType) {
        let mut records = self.records.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(record) = records.get_mut(document_id) {
            record.grants.insert(user_id.to_string(), perm);
        }
    }

    /// Lock a document for review
    pub fn lock(&self, document_id: &str, reason: impl Into<String>) {
        let mut records = self.records.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(record) = records.get_mut(document_id) {
            record.locked_reasons.push(reason.into());
        }
    }

    pub fn unlock(&self, document_id: &str) {
        let mut records = self.records.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(record) = records.get_mut(document_id) {
            record.locked_reasons.clear();
        }
    }

    fn read<T>(&self, document_id: &str, f: impl FnOnce(&DocumentRecord) -> T) -> Option<T> {
        let records = self.records.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        records.get(document_id).map(f)
    }
}

#[async_trait]
impl DocumentDirectory for StaticDirectory {
    async fn document(&self, document_id: &str) -> BackendResult<Option<DocumentInfo>> {
        Ok(self.read(document_id, |record| record.info.clone()))
    }

    async fn locked_reasons(&self, document_id: &str) -> BackendResult<Vec<String>> {
        Ok(self
            .read(document_id, |record| record.locked_reasons.clone())
            .unwrap_or_default())
    }

    async fn add_size(&self, document_id: &str, delta: i64) -> BackendResult<()> {
        let mut records = self.records.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(record) = records.get_mut(document_id) {
            record.info.size += delta;
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionResolver for StaticDirectory {
    async fn resolve(&self, document_id: &str, user_id: &str) -> BackendResult<PermType> {
        Ok(self
            .read(document_id, |record| record.grants.get(user_id).copied())
            .flatten()
            .unwrap_or(PermType::None))
    }
}
