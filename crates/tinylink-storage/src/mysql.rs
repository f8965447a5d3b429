use crate::error::{is_unique_violation, map_sqlx_error, to_u64, Result};
use async_trait::async_trait;
use jiff::Timestamp;
use sqlx::mysql::{MySqlPoolOptions, MySqlRow};
use sqlx::pool::PoolConnection;
use sqlx::{MySql, MySqlPool, QueryBuilder, Row};
use std::collections::HashMap;
use tinylink_core::{
    ClickRecorder, CodePool, PoolEntry, ReadRepository, Repository, ShortCode, StorageError,
    UrlRecord,
};
use tracing::{debug, warn};

/// Name of the MySQL user lock that serialises pool replenishment.
pub const REPLENISH_LOCK_NAME: &str = "tinylink.code_pool.replenish";

/// Upper bound on rows per multi-row `INSERT`, well below the protocol's
/// placeholder limit.
const MAX_CODES_PER_INSERT: usize = 5_000;

fn now_unix_seconds() -> i64 {
    Timestamp::now().as_second()
}

fn parse_timestamp(seconds: i64) -> Result<Timestamp> {
    Timestamp::from_second(seconds).map_err(|e| {
        StorageError::InvalidData(format!("invalid created_at timestamp '{}': {e}", seconds))
    })
}

async fn connect_pool(database_url: &str, max_connections: u32) -> Result<MySqlPool> {
    MySqlPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(map_sqlx_error)
}

/// MySQL implementation of the mapping store.
///
/// Mappings are never deleted, and `original_url` is never updated after
/// insert; only `clicks` changes.
#[derive(Debug, Clone)]
pub struct MySqlRepository {
    pool: MySqlPool,
}

impl MySqlRepository {
    /// Creates a repository from an existing MySQL connection pool.
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Creates a repository by opening a new MySQL connection pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        Ok(Self::new(connect_pool(database_url, max_connections).await?))
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Creates the `short_urls` table if it does not exist.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../ddl/mysql/short_urls.sql"))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

fn decode_record(row: &MySqlRow) -> Result<(ShortCode, UrlRecord)> {
    let short_code: String = row.try_get("short_code").map_err(map_sqlx_error)?;
    let original_url: String = row.try_get("original_url").map_err(map_sqlx_error)?;
    let created_at: i64 = row.try_get("created_at").map_err(map_sqlx_error)?;
    let clicks: i64 = row.try_get("clicks").map_err(map_sqlx_error)?;

    Ok((
        ShortCode::new_unchecked(short_code),
        UrlRecord {
            original_url,
            created_at: parse_timestamp(created_at)?,
            clicks: to_u64(clicks, "clicks")?,
        },
    ))
}

#[async_trait]
impl ReadRepository for MySqlRepository {
    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>> {
        let row = sqlx::query(
            r#"
            SELECT short_code, original_url, created_at, clicks
            FROM short_urls
            WHERE short_code = ?
            LIMIT 1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref()
            .map(decode_record)
            .transpose()
            .map(|found| found.map(|(_, record)| record))
    }

    async fn get_many(&self, codes: &[ShortCode]) -> Result<HashMap<ShortCode, UrlRecord>> {
        if codes.is_empty() {
            return Ok(HashMap::new());
        }

        let mut builder = QueryBuilder::<MySql>::new(
            "SELECT short_code, original_url, created_at, clicks FROM short_urls WHERE short_code IN (",
        );
        let mut separated = builder.separated(", ");
        for code in codes {
            separated.push_bind(code.as_str().to_owned());
        }
        separated.push_unseparated(")");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.iter().map(decode_record).collect()
    }

    async fn exists(&self, code: &ShortCode) -> Result<bool> {
        let exists = sqlx::query(
            r#"
            SELECT 1
            FROM short_urls
            WHERE short_code = ?
            LIMIT 1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .is_some();

        Ok(exists)
    }
}

#[async_trait]
impl Repository for MySqlRepository {
    async fn insert(&self, code: &ShortCode, record: UrlRecord) -> Result<()> {
        let clicks = i64::try_from(record.clicks)
            .map_err(|_| StorageError::InvalidData(format!("clicks overflow: {}", record.clicks)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO short_urls (short_code, original_url, created_at, clicks)
            VALUES (?, ?, ?, ?)
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
            WHERE original_url = ?
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
            LIMIT ?
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
impl ClickRecorder for MySqlRepository {
    async fn record_click(&self, code: &ShortCode) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE short_urls
            SET clicks = clicks + 1
            WHERE short_code = ?
            "#,
        )
        .bind(code.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }
}

/// MySQL implementation of the code pool.
///
/// `take` claims one row with `SELECT ... FOR UPDATE SKIP LOCKED`, so
/// concurrent allocators each lock a different row instead of queueing on
/// the same one. Claimed rows keep their `claimed_at` stamp and stay in the
/// table, which makes the unique key reject codes that were handed out before.
#[derive(Debug, Clone)]
pub struct MySqlCodePool {
    pool: MySqlPool,
}

/// Holds the connection that owns the `GET_LOCK` user lock.
///
/// If the lease is dropped without [`CodePool::unlock_replenish`], the
/// connection is detached from the pool and closed, which makes the server
/// release the lock.
pub struct MySqlReplenishLease {
    conn: Option<PoolConnection<MySql>>,
}

impl Drop for MySqlReplenishLease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!("replenish lease not released cleanly; closing its connection");
            drop(conn.detach());
        }
    }
}

impl MySqlCodePool {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        Ok(Self::new(connect_pool(database_url, max_connections).await?))
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Creates the `code_pool` table if it does not exist.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../ddl/mysql/code_pool.sql"))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl CodePool for MySqlCodePool {
    type Lease = MySqlReplenishLease;

    async fn size(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM code_pool
            WHERE claimed_at IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        to_u64(count, "pool size")
    }

    async fn insert_codes(&self, codes: &[ShortCode]) -> Result<u64> {
        let now = now_unix_seconds();
        let mut inserted = 0;

        for chunk in codes.chunks(MAX_CODES_PER_INSERT) {
            let mut builder =
                QueryBuilder::<MySql>::new("INSERT IGNORE INTO code_pool (short_code, created_at) ");
            builder.push_values(chunk, |mut row, code| {
                row.push_bind(code.as_str().to_owned()).push_bind(now);
            });

            let result = builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    async fn take(&self) -> Result<Option<PoolEntry>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let row = sqlx::query(
            r#"
            SELECT id, short_code
            FROM code_pool
            WHERE claimed_at IS NULL
            ORDER BY id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(None);
        };

        let id: i64 = row.try_get("id").map_err(map_sqlx_error)?;
        let short_code: String = row.try_get("short_code").map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            UPDATE code_pool
            SET claimed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now_unix_seconds())
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(Some(PoolEntry {
            sequence: to_u64(id, "id")?,
            code: ShortCode::new_unchecked(short_code),
        }))
    }

    async fn try_lock_replenish(&self) -> Result<Option<Self::Lease>> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;

        let acquired: Option<i64> = sqlx::query_scalar("SELECT GET_LOCK(?, 0)")
            .bind(REPLENISH_LOCK_NAME)
            .fetch_one(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

        if acquired == Some(1) {
            debug!(lock = REPLENISH_LOCK_NAME, "acquired replenish lock");
            Ok(Some(MySqlReplenishLease { conn: Some(conn) }))
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

        let released: Option<i64> = sqlx::query_scalar("SELECT RELEASE_LOCK(?)")
            .bind(REPLENISH_LOCK_NAME)
            .fetch_one(&mut **conn)
            .await
            .map_err(map_sqlx_error)?;
        drop(lease.conn.take());

        if released != Some(1) {
            warn!(lock = REPLENISH_LOCK_NAME, ?released, "replenish lock was not held");
        }

        Ok(())
    }
}
