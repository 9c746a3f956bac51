/**
 * Postgres Operation Log Store
 *
 * Stores `CmdItem`s in `cmd_items`. The command payload is kept as JSONB;
 * the columns the store queries on (`document_id`, `cmd_id`, `ver_id`) are
 * real columns with unique constraints, so duplicate detection is done by
 * the database and not by a read-then-write check.
 */

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::backend::error::{BackendError, BackendResult};
use crate::backend::oplog::store::{AppendError, LogStore};
use crate::shared::{Cmd, CmdItem};

const CMD_UNIQUE_CONSTRAINT: &str = "cmd_items_document_cmd_key";
const VER_UNIQUE_CONSTRAINT: &str = "cmd_items_document_ver_key";

#[derive(Debug, sqlx::FromRow)]
struct CmdItemRow {
    document_id: String,
    user_id: String,
    ver_id: i64,
    batch_start: i64,
    batch_length: i64,
    cmd: Json<Cmd>,
}

impl From<CmdItemRow> for CmdItem {
    fn from(row: CmdItemRow) -> Self {
        CmdItem {
            document_id: row.document_id,
            user_id: row.user_id,
            ver_id: row.ver_id.max(0) as u64,
            batch_start: row.batch_start.max(0) as u64,
            batch_length: row.batch_length.max(0) as u64,
            cmd: row.cmd.0,
        }
    }
}

/// Log store in Postgres
#[derive(Clone)]
pub struct PgLogStore {
    pool: PgPool,
}

impl PgLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn classify_insert_error(err: sqlx::Error, item: &CmdItem) -> AppendError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            match db_err.constraint() {
                Some(CMD_UNIQUE_CONSTRAINT) => {
                    return AppendError::DuplicateCmd {
                        cmd_id: item.cmd.id.clone(),
                    }
                }
                Some(VER_UNIQUE_CONSTRAINT) => {
                    return AppendError::VersionConflict { ver_id: item.ver_id }
                }
                _ => {}
            }
        }
    }
    AppendError::Store(BackendError::from(err))
}

#[async_trait]
impl LogStore for PgLogStore {
    async fn append(&self, items: &[CmdItem]) -> Result<(), AppendError> {
        if items.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;

        for item in items {
            let inserted = sqlx::query(
                r#"
                INSERT INTO cmd_items (document_id, cmd_id, ver_id, batch_start, batch_length, user_id, cmd)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(&item.document_id)
            .bind(&item.cmd.id)
            .bind(item.ver_id as i64)
            .bind(item.batch_start as i64)
            .bind(item.batch_length as i64)
            .bind(&item.user_id)
            .bind(Json(&item.cmd))
            .execute(&mut *tx)
            .await;

            if let Err(err) = inserted {
                // dropping the transaction rolls back the earlier rows
                return Err(classify_insert_error(err, item));
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn last_ver_id(&self, document_id: &str) -> BackendResult<u64> {
        let last: Option<i64> = sqlx::query_scalar("SELECT MAX(ver_id) FROM cmd_items WHERE document_id = $1")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(last.unwrap_or(0).max(0) as u64)
    }

    async fn range(&self, document_id: &str, from: u64, to: Option<u64>) -> BackendResult<Vec<CmdItem>> {
        let rows: Vec<CmdItemRow> = match to {
            Some(to) => {
                sqlx::query_as(
                    r#"
                    SELECT document_id, user_id, ver_id, batch_start, batch_length, cmd
                    FROM cmd_items
                    WHERE document_id = $1 AND ver_id >= $2 AND ver_id <= $3
                    ORDER BY ver_id ASC
                    "#,
                )
                .bind(document_id)
                .bind(from as i64)
                .bind(to as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT document_id, user_id, ver_id, batch_start, batch_length, cmd
                    FROM cmd_items
                    WHERE document_id = $1 AND ver_id >= $2
                    ORDER BY ver_id ASC
                    "#,
                )
                .bind(document_id)
                .bind(from as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(CmdItem::from).collect())
    }

    async fn find_by_cmd_id(&self, document_id: &str, cmd_id: &str) -> BackendResult<Option<CmdItem>> {
        let row: Option<CmdItemRow> = sqlx::query_as(
            r#"
            SELECT document_id, user_id, ver_id, batch_start, batch_length, cmd
            FROM cmd_items
            WHERE document_id = $1 AND cmd_id = $2
            "#,
        )
        .bind(document_id)
        .bind(cmd_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(CmdItem::from))
    }
}
