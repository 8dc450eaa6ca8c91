//! Campaign log repository
//!
//! Append-only operational log per campaign, surfaced through the API
//! so operators can see why the engine did what it did.

use disparo_common::types::{CampaignId, TenantId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CampaignLog, CreateCampaignLog};

/// Campaign log repository
#[derive(Clone)]
pub struct CampaignLogRepository {
    pool: PgPool,
}

impl CampaignLogRepository {
    /// Create a new campaign log repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a log entry
    pub async fn create(&self, input: CreateCampaignLog) -> Result<CampaignLog, sqlx::Error> {
        let id = Uuid::now_v7();

        sqlx::query_as::<_, CampaignLog>(
            r#"
            INSERT INTO campaign_logs (
                id, tenant_id, campaign_id, severity, event_type, message, details
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.tenant_id)
        .bind(input.campaign_id)
        .bind(input.severity.to_string())
        .bind(&input.event_type)
        .bind(&input.message)
        .bind(&input.details)
        .fetch_one(&self.pool)
        .await
    }

    /// Tail the most recent entries for a campaign, newest first
    pub async fn tail(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
        limit: i64,
    ) -> Result<Vec<CampaignLog>, sqlx::Error> {
        sqlx::query_as::<_, CampaignLog>(
            r#"
            SELECT * FROM campaign_logs
            WHERE tenant_id = $1 AND campaign_id = $2
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(tenant_id)
        .bind(campaign_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Delete entries older than the retention window
    pub async fn purge_older_than_days(&self, days: i32) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM campaign_logs WHERE created_at < NOW() - make_interval(days => $1)",
        )
        .bind(days)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
