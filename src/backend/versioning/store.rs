//! Materialized version pointers
//!
//! A `DocumentVersion` records that the snapshot `version_id` folds the
//! operation log up to `last_cmd_ver_id`. The latest pointer tells the
//! trigger where the next range starts and tells `bind` which version a
//! client should load.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::PgPool;

use crate::backend::error::BackendResult;
use crate::shared::DocumentVersion;

#[async_trait]
pub trait VersionStore: Send + Sync {
    async fn record(&self, version: &DocumentVersion) -> BackendResult<()>;

    /// The version with the highest `last_cmd_ver_id`
    async fn latest(&self, document_id: &str) -> BackendResult<Option<DocumentVersion>>;

    async fn get(&self, document_id: &str, version_id: &str) -> BackendResult<Option<DocumentVersion>>;
}

pub type SharedVersions = Arc<dyn VersionStore>;

/// Version pointers in memory
#[derive(Default)]
pub struct InMemoryVersionStore {
    versions: Mutex<HashMap<String, Vec<DocumentVersion>>>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionStore for InMemoryVersionStore {
    async fn record(&self, version: &DocumentVersion) -> BackendResult<()> {
        let mut versions = self.versions.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let list = versions.entry(version.document_id.clone()).or_default();
        list.retain(|existing| existing.version_id != version.version_id);
        list.push(version.clone());
        Ok(())
    }

    async fn latest(&self, document_id: &str) -> BackendResult<Option<DocumentVersion>> {
        let versions = self.versions.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(versions
            .get(document_id)
            .and_then(|list| list.iter().max_by_key(|version| version.last_cmd_ver_id))
            .cloned())
    }

    async fn get(&self, document_id: &str, version_id: &str) -> BackendResult<Option<DocumentVersion>> {
        let versions = self.versions.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(versions
            .get(document_id)
            .and_then(|list| list.iter().find(|version| version.version_id == version_id))
            .cloned())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct VersionRow {
    document_id: String,
    version_id: String,
    last_cmd_ver_id: i64,
}

impl From<VersionRow> for DocumentVersion {
    fn from(row: VersionRow) -> Self {
        DocumentVersion {
            document_id: row.document_id,
            version_id: row.version_id,
            last_cmd_ver_id: row.last_cmd_ver_id.max(0) as u64,
        }
    }
}

/// Version pointers in `document_versions`
#[derive(Clone)]
pub struct PgVersionStore {
    pool: PgPool,
}

impl PgVersionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VersionStore for PgVersionStore {
    async fn record(&self, version: &DocumentVersion) -> BackendResult<()> {
        sqlx::query(
            r#"
            INSERT INTO document_versions (document_id, version_id, last_cmd_ver_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (document_id, version_id)
            DO UPDATE SET last_cmd_ver_id = EXCLUDED.last_cmd_ver_id
            "#,
        )
        .bind(&version.document_id)
        .bind(&version.version_id)
        .bind(version.last_cmd_ver_id as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest(&self, document_id: &str) -> BackendResult<Option<DocumentVersion>> {
        let row: Option<VersionRow> = sqlx::query_as(
            r#"
            SELECT document_id, version_id, last_cmd_ver_id
            FROM document_versions
            WHERE document_id = $1
            ORDER BY last_cmd_ver_id DESC
            LIMIT 1
            "#,
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(DocumentVersion::from))
    }

    async fn get(&self, document_id: &str, version_id: &str) -> BackendResult<Option<DocumentVersion>> {
        let row: Option<VersionRow> = sqlx::query_as(
            r#"
            SELECT document_id, version_id, last_cmd_ver_id
            FROM document_versions
            WHERE document_id = $1 AND version_id = $2
            "#,
        )
        .bind(document_id)
        .bind(version_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(DocumentVersion::from))
    }
}
