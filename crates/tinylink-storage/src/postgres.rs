use crate::error::{is_unique_violation, map_sqlx_error, to_u64, Result};
use async_trait::async_trait;
use jiff::Timestamp;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};
use std::collections::HashMap;
use tinylink_core::{
    ClickRecorder, CodePool, PoolEntry, ReadRepository, Repository, ShortCode, StorageError,
    UrlRecord,
};
use tracing::{debug, warn};

/// Key of the session-level advisory lock that serialises pool replenishment.
pub const REPLENISH_LOCK_KEY: i64 = 0x7469_6e79_6c6e_6b;

fn now_unix_seconds() -> i64 {
    Timestamp::now().as_second()
}

async fn connect_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(map_sqlx_error)
}

fn decode_record(row: &PgRow) -> Result<(ShortCode, UrlRecord)> {
    let short_code: String = row.try_get("short_code").map_err(map_sqlx_error)?;
    let original_url: String = row.try_get("original_url").map_err(map_sqlx_error)?;
    let created_at: i64 = row.try_get("created_at").map_err(map_sqlx_error)?;
    let clicks: i64 = row.try_get("clicks").map_err(map_sqlx_error)?;

    let created_at = Timestamp::from_second(created_at).map_err(|e| {
        StorageError::InvalidData(format!("invalid created_at timestamp '{created_at}': {e}"))
    })?;

    Ok((
        ShortCode::new_unchecked(short_code),
        UrlRecord {
            original_url,
            created_at,
            clicks: to_u64(clicks, "clicks")?,
        },
    ))
}

/// PostgreSQL implementation of the mapping store.
#[derive(Debug, Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        Ok(Self::new(connect_pool(database_url, max_connections).await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the `short_urls` table if it does not exist.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../ddl/postgres/short_urls.sql"))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl ReadRepository for PostgresRepository {
    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>> {
        let row = sqlx::query(
            r#"
            SELECT short_code, original_url, created_at, clicks
            FROM short_urls
            WHERE short_code = $1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => Ok(Some(decode_record(&row)?.1)),
            None => Ok(None),
        }
    }

    async fn get_many(&self, codes: &[ShortCode]) -> Result<HashMap<ShortCode, UrlRecord>> {
        if codes.is_empty() {
            return Ok(HashMap::new());
        }

        let keys: Vec<String> = codes.iter().map(|code| code.as_str().to_owned()).collect();
        let rows = sqlx::query(
            r#"
            SELECT short_code, original_url, created_at, clicks
            FROM short_urls
            WHERE short_code = ANY($1)
            "#,
        )
        .bind(keys)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(decode_record).collect()
    }

    async fn exists(&self, code: &ShortCode) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM short_urls WHERE short_code = $1)")
                .bind(code.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(exists)
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn insert(&self, code: &ShortCode, record: UrlRecord) -> Result<()> {
        let clicks = i64::try_from(record.clicks)
            .map_err(|_| StorageError::InvalidData(format!("clicks overflow: {}", record.clicks)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO short_urls (short_code, original_url, created_at, clicks)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(code.as_str())
        .bind(record.original_url)
        .bind(record.created_at.as_second())
        .bind(clicks)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StorageError::Conflict(code.to_string())),
            Err(err) => Err(map_sqlx_error(err)),
        }
    }

    async fn find_by_original_url(&self, original_url: &str) -> Result<Option<ShortCode>> {
        let short_code: Option<String> = sqlx::query_scalar(
            r#"
            SELECT short_code
            FROM short_urls
            WHERE original_url = $1
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(original_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(short_code.map(ShortCode::new_unchecked))
    }

    async fn list(&self, limit: usize) -> Result<Vec<(ShortCode, UrlRecord)>> {
        let rows = sqlx::query(
            r#"
            SELECT short_code, original_url, created_at, clicks
            FROM short_urls
            ORDER BY id DESC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(decode_record).collect()
    }
}

#[async_trait]
impl ClickRecorder for PostgresRepository {
    async fn record_click(&self, code: &ShortCode) -> Result<bool> {
        let result = sqlx::query("UPDATE short_urls SET clicks = clicks + 1 WHERE short_code = $1")
            .bind(code.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }
}

/// PostgreSQL implementation of the code pool.
///
/// A single `UPDATE ... FROM (SELECT ... FOR UPDATE SKIP LOCKED)` both picks
/// and claims the oldest free row, so concurrent allocators never block on
/// each other's row locks.
#[derive(Debug, Clone)]
pub struct PostgresCodePool {
    pool: PgPool,
}

/// Holds the connection that owns the replenish advisory lock.
///
/// Advisory locks are session scoped: if the lease is dropped without
/// [`CodePool::unlock_replenish`], the connection is detached and closed so
/// the lock cannot leak back into the pool.
pub struct PostgresReplenishLease {
    conn: Option<PoolConnection<Postgres>>,
}

impl Drop for PostgresReplenishLease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!("replenish lease not released cleanly; closing its connection");
            drop(conn.detach());
        }
    }
}

impl PostgresCodePool {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        Ok(Self::new(connect_pool(database_url, max_connections).await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the `code_pool` table if it does not exist.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../ddl/postgres/code_pool.sql"))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl CodePool for PostgresCodePool {
    type Lease = PostgresReplenishLease;

    async fn size(&self) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM code_pool WHERE claimed_at IS NULL")
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        to_u64(count, "pool size")
    }

    async fn insert_codes(&self, codes: &[ShortCode]) -> Result<u64> {
        if codes.is_empty() {
            return Ok(0);
        }

        let values: Vec<String> = codes.iter().map(|code| code.as_str().to_owned()).collect();
        let result = sqlx::query(
            r#"
            INSERT INTO code_pool (short_code, created_at)
            SELECT UNNEST($1::text[]), $2
            ON CONFLICT (short_code) DO NOTHING
            "#,
        )
        .bind(values)
        .bind(now_unix_seconds())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn take(&self) -> Result<Option<PoolEntry>> {
        let row = sqlx::query(
            r#"
            WITH next AS (
                SELECT id
                FROM code_pool
                WHERE claimed_at IS NULL
                ORDER BY id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE code_pool
            SET claimed_at = $1
            FROM next
            WHERE code_pool.id = next.id
            RETURNING code_pool.id, code_pool.short_code
            "#,
        )
        .bind(now_unix_seconds())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.try_get("id").map_err(map_sqlx_error)?;
        let short_code: String = row.try_get("short_code").map_err(map_sqlx_error)?;

        Ok(Some(PoolEntry {
            sequence: to_u64(id, "id")?,
            code: ShortCode::new_unchecked(short_code),
        }))
    }

    async fn try_lock_replenish(&self) -> Result<Option<Self::Lease>> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(REPLENISH_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

        if acquired {
            debug!(lock = REPLENISH_LOCK_KEY, "acquired replenish lock");
            Ok(Some(PostgresReplenishLease { conn: Some(conn) }))
        } else {
            Ok(None)
        }
    }

    async fn unlock_replenish(&self, mut lease: Self::Lease) -> Result<()> {
        // On error the lease drops with the connection still inside and
        // detaches it, so a possibly still held lock dies with the session.
        let Some(conn) = lease.conn.as_mut() else {
            return Ok(());
        };

        let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(REPLENISH_LOCK_KEY)
            .fetch_one(&mut **conn)
            .await
            .map_err(map_sqlx_error)?;
        drop(lease.conn.take());

        if !released {
            warn!(lock = REPLENISH_LOCK_KEY, "replenish lock was not held");
        }

        Ok(())
    }
}
