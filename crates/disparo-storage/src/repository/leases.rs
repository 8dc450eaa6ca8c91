//! Lease repository
//!
//! Cluster-wide exclusive ownership with a TTL, backed by a plain
//! table. Acquisition is a single INSERT .. ON CONFLICT statement:
//! it wins when the key is free, the previous lease has expired, or
//! the caller already holds it. Renew and release are fenced on the
//! holder token so a process that lost its lease cannot touch a
//! successor's.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Lease;

/// Lease repository
#[derive(Clone)]
pub struct LeaseRepository {
    pool: PgPool,
}

impl LeaseRepository {
    /// Create a new lease repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Try to acquire a lease. Returns true when this holder now owns
    /// the key.
    pub async fn acquire(
        &self,
        key: &str,
        holder: Uuid,
        ttl_secs: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO leases (key, holder, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3::double precision))
            ON CONFLICT (key) DO UPDATE SET
                holder = EXCLUDED.holder,
                expires_at = EXCLUDED.expires_at
            WHERE leases.expires_at < NOW() OR leases.holder = EXCLUDED.holder
            "#,
        )
        .bind(key)
        .bind(holder)
        .bind(ttl_secs)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Extend a lease this holder owns. Returns false when the lease
    /// was lost to another holder or no longer exists.
    pub async fn renew(
        &self,
        key: &str,
        holder: Uuid,
        ttl_secs: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE leases SET
                expires_at = NOW() + make_interval(secs => $3::double precision)
            WHERE key = $1 AND holder = $2
            "#,
        )
        .bind(key)
        .bind(holder)
        .bind(ttl_secs)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Release a lease this holder owns
    pub async fn release(&self, key: &str, holder: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM leases WHERE key = $1 AND holder = $2")
            .bind(key)
            .bind(holder)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get the current lease row for a key, expired or not
    pub async fn get(&self, key: &str) -> Result<Option<Lease>, sqlx::Error> {
        sqlx::query_as::<_, Lease>("SELECT * FROM leases WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
    }

    /// Whether a key is held by a live, unexpired lease
    pub async fn is_live(&self, key: &str) -> Result<bool, sqlx::Error> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM leases WHERE key = $1 AND expires_at > NOW())",
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// When the live lease on a key expires, if any
    pub async fn live_until(&self, key: &str) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT expires_at FROM leases WHERE key = $1 AND expires_at > NOW()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }

    /// Drop expired lease rows
    pub async fn purge_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM leases WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
