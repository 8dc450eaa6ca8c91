//! Phone lock repository
//!
//! Short-lived per-destination locks that keep two workers from
//! messaging the same phone number at the same time, including across
//! campaigns. Same acquisition shape as leases but keyed by E.164
//! number, never renewed and never reentrant: unlike a lease, a held
//! lock refuses every second acquire until it is released or its TTL
//! lapses, whoever asks.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::PhoneLock;

/// Lock rows live in the same keyspace shape as leases
fn lock_key(phone: &str) -> String {
    format!("phone-lock:{}", phone)
}

/// Phone lock repository
#[derive(Clone)]
pub struct PhoneLockRepository {
    pool: PgPool,
}

impl PhoneLockRepository {
    /// Create a new phone lock repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Try to lock a phone number. Returns true when this holder got
    /// the lock. A live lock is never taken over, not even by its own
    /// holder; only an expired row yields.
    pub async fn acquire(
        &self,
        phone: &str,
        holder: Uuid,
        ttl_secs: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO phone_locks (key, holder, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3::double precision))
            ON CONFLICT (key) DO UPDATE SET
                holder = EXCLUDED.holder,
                expires_at = EXCLUDED.expires_at
            WHERE phone_locks.expires_at < NOW()
            "#,
        )
        .bind(lock_key(phone))
        .bind(holder)
        .bind(ttl_secs)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Release a lock this holder owns
    pub async fn release(&self, phone: &str, holder: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM phone_locks WHERE key = $1 AND holder = $2")
            .bind(lock_key(phone))
            .bind(holder)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get the current lock row for a number, expired or not
    pub async fn get(&self, phone: &str) -> Result<Option<PhoneLock>, sqlx::Error> {
        sqlx::query_as::<_, PhoneLock>("SELECT * FROM phone_locks WHERE key = $1")
            .bind(lock_key(phone))
            .fetch_optional(&self.pool)
            .await
    }

    /// Drop expired lock rows
    pub async fn purge_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM phone_locks WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lock_key_format() {
        assert_eq!(lock_key("+5511999887766"), "phone-lock:+5511999887766");
    }
}
