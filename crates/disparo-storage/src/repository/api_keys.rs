//! API key repository
//!
//! Kept behind a trait so the HTTP auth layer can be tested against an
//! in-memory implementation.

use crate::db::DatabasePool;
use crate::models::ApiKey;
use async_trait::async_trait;
use chrono::Utc;
use disparo_common::types::ApiKeyId;
use disparo_common::{Error, Result};

/// API key repository trait
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    /// Find candidate keys by prefix (for initial lookup)
    async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>>;

    /// Get an API key by ID
    async fn get(&self, id: ApiKeyId) -> Result<Option<ApiKey>>;

    /// Update last_used_at timestamp
    async fn update_last_used(&self, id: ApiKeyId) -> Result<()>;
}

/// Database API key repository
pub struct DbApiKeyRepository {
    pool: DatabasePool,
}

impl DbApiKeyRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyRepository for DbApiKeyRepository {
    async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>> {
        sqlx::query_as::<_, ApiKey>(
            r#"
            SELECT id, tenant_id, name, key_hash, key_prefix, scopes,
                   expires_at, last_used_at, created_at
            FROM api_keys
            WHERE key_prefix = $1
              AND (expires_at IS NULL OR expires_at > NOW())
            LIMIT 10
            "#,
        )
        .bind(prefix)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn get(&self, id: ApiKeyId) -> Result<Option<ApiKey>> {
        sqlx::query_as::<_, ApiKey>(
            r#"
            SELECT id, tenant_id, name, key_hash, key_prefix, scopes,
                   expires_at, last_used_at, created_at
            FROM api_keys
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn update_last_used(&self, id: ApiKeyId) -> Result<()> {
        let now = Utc::now();
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}
