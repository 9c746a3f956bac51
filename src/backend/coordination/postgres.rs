/**
 * Postgres Coordination Backends
 *
 * `PgLockService` and `PgCache` keep leases and cache cells in the same
 * database as the operation log, so every process sees one shared state.
 *
 * # Leases
 *
 * A lease row is taken with an upsert that only overwrites a row that has
 * expired or already belongs to the caller. The database serializes
 * concurrent upserts on the primary key, so at most one caller wins.
 *
 * # Expiry
 *
 * Expired rows stay until `prune_expired` runs; every read filters on
 * `expires_at`, so they are never visible.
 */

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::backend::coordination::cache::SharedCache;
use crate::backend::coordination::lock::LockService;
use crate::backend::error::BackendResult;

/// Lease store in `sync_locks`
#[derive(Clone)]
pub struct PgLockService {
    pool: PgPool,
}

impl PgLockService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockService for PgLockService {
    async fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> BackendResult<bool> {
        let acquired: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO sync_locks (name, holder, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (name) DO UPDATE
                SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
                WHERE sync_locks.expires_at < NOW() OR sync_locks.holder = EXCLUDED.holder
            RETURNING holder
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;
        Ok(acquired.is_some())
    }

    async fn release(&self, name: &str, holder: &str) -> BackendResult<bool> {
        let result = sqlx::query("DELETE FROM sync_locks WHERE name = $1 AND holder = $2")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Cache cells in `sync_cache` and `sync_cache_hash`
#[derive(Clone)]
pub struct PgCache {
    pool: PgPool,
}

impl PgCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete expired cells, expired hash fields and expired leases
    pub async fn prune_expired(&self) -> BackendResult<u64> {
        let mut removed = 0;
        for statement in [
            "DELETE FROM sync_cache WHERE expires_at < NOW()",
            "DELETE FROM sync_cache_hash WHERE expires_at < NOW()",
            "DELETE FROM sync_locks WHERE expires_at < NOW()",
        ] {
            removed += sqlx::query(statement).execute(&self.pool).await?.rows_affected();
        }
        Ok(removed)
    }
}

#[async_trait]
impl SharedCache for PgCache {
    async fn get(&self, key: &str) -> BackendResult<Option<String>> {
        let value = sqlx::query_scalar("SELECT value FROM sync_cache WHERE key = $1 AND expires_at > NOW()")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> BackendResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_cache (key, value, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (key) DO UPDATE
                SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        sqlx::query("DELETE FROM sync_cache WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn hash_set(&self, key: &str, field: &str, value: String, ttl: Duration) -> BackendResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_cache_hash (key, field, value, expires_at)
            VALUES ($1, $2, $3, NOW() + make_interval(secs => $4))
            ON CONFLICT (key, field) DO UPDATE
                SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(field)
        .bind(value)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> BackendResult<bool> {
        let result = sqlx::query(
            "DELETE FROM sync_cache_hash WHERE key = $1 AND field = $2 AND expires_at > NOW()",
        )
        .bind(key)
        .bind(field)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn hash_get_all(&self, key: &str) -> BackendResult<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT field, value FROM sync_cache_hash WHERE key = $1 AND expires_at > NOW()",
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }
}
