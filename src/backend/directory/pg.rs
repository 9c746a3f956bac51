//! Postgres document directory
//!
//! Reads the `documents` and `document_permissions` tables maintained by the
//! administration service.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::backend::directory::documents::{DocumentDirectory, PermissionResolver};
use crate::backend::error::BackendResult;
use crate::shared::{DocumentInfo, PermType};

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    id: String,
    owner_id: String,
    name: String,
    path: String,
    version_id: String,
    size: i64,
}

/// Directory and permission resolver over Postgres
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentDirectory for PgDirectory {
    async fn document(&self, document_id: &str) -> BackendResult<Option<DocumentInfo>> {
        let row: Option<DocumentRow> = sqlx::query_as(
            "SELECT id, owner_id, name, path, version_id, size FROM documents WHERE id = $1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| DocumentInfo {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            path: row.path,
            version_id: row.version_id,
            size: row.size,
            perm_type: PermType::None,
        }))
    }

    async fn locked_reasons(&self, document_id: &str) -> BackendResult<Vec<String>> {
        let reasons: Option<Vec<String>> =
            sqlx::query_scalar("SELECT locked_reasons FROM documents WHERE id = $1")
                .bind(document_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(reasons.unwrap_or_default())
    }

    async fn add_size(&self, document_id: &str, delta: i64) -> BackendResult<()> {
        sqlx::query("UPDATE documents SET size = size + $2 WHERE id = $1")
            .bind(document_id)
            .bind(delta)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PermissionResolver for PgDirectory {
    async fn resolve(&self, document_id: &str, user_id: &str) -> BackendResult<PermType> {
        let row: Option<(String, Option<i16>)> = sqlx::query_as(
            r#"
            SELECT d.owner_id, p.perm_type
            FROM documents d
            LEFT JOIN document_permissions p ON p.document_id = d.id AND p.user_id = $2
            WHERE d.id = $1
            "#,
        )
        .bind(document_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let perm = match row {
            None => PermType::None,
            Some((owner_id, _)) if owner_id == user_id => PermType::Editable,
            Some((_, Some(level))) => u8::try_from(level)
                .ok()
                .and_then(|level| PermType::try_from(level).ok())
                .unwrap_or(PermType::None),
            Some((_, None)) => PermType::None,
        };
        Ok(perm)
    }
}
