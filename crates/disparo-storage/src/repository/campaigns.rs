//! Campaign repository
//!
//! Lifecycle transitions are expressed as conditional single-statement
//! updates so a dispatcher loop and an operator request racing each
//! other can never resurrect a terminal campaign.

use chrono::{DateTime, Utc};
use disparo_common::types::{CampaignId, TenantId};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Campaign, CampaignStatus, CreateCampaign, UpdateCampaign};

/// Campaign repository
#[derive(Clone)]
pub struct CampaignRepository {
    pool: PgPool,
}

impl CampaignRepository {
    /// Create a new campaign repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new campaign in draft state
    pub async fn create(&self, input: CreateCampaign) -> Result<Campaign, sqlx::Error> {
        let id = Uuid::new_v4();

        sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (
                id, tenant_id, name, description, status, rotation_mode,
                interval_min_s, interval_max_s, daily_limit_per_instance,
                pause_on_health_below, schedule
            )
            VALUES ($1, $2, $3, $4, 'draft', $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.tenant_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.rotation_mode.to_string())
        .bind(input.interval_min_s)
        .bind(input.interval_max_s)
        .bind(input.daily_limit_per_instance.unwrap_or(0))
        .bind(input.pause_on_health_below.unwrap_or(30))
        .bind(Json(&input.schedule))
        .fetch_one(&self.pool)
        .await
    }

    /// Get a campaign by ID
    pub async fn get(&self, id: CampaignId) -> Result<Option<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Get a campaign by ID and tenant
    pub async fn get_by_tenant(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Option<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// List campaigns for a tenant
    pub async fn list_by_tenant(
        &self,
        tenant_id: TenantId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>, sqlx::Error> {
        if let Some(status) = status {
            sqlx::query_as::<_, Campaign>(
                r#"
                SELECT * FROM campaigns
                WHERE tenant_id = $1 AND status = $2
                ORDER BY created_at DESC
                LIMIT $3 OFFSET $4
                "#,
            )
            .bind(tenant_id)
            .bind(status.to_string())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Campaign>(
                r#"
                SELECT * FROM campaigns
                WHERE tenant_id = $1
                ORDER BY created_at DESC
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(tenant_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        }
    }

    /// Update a campaign. Only draft campaigns accept edits; anything
    /// else is returned unchanged.
    pub async fn update(
        &self,
        id: CampaignId,
        tenant_id: TenantId,
        input: UpdateCampaign,
    ) -> Result<Option<Campaign>, sqlx::Error> {
        let current = match self.get_by_tenant(tenant_id, id).await? {
            Some(c) => c,
            None => return Ok(None),
        };

        if current.status != "draft" {
            return Ok(Some(current));
        }

        let schedule = input.schedule.map(Json);

        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                name = COALESCE($3, name),
                description = COALESCE($4, description),
                rotation_mode = COALESCE($5, rotation_mode),
                interval_min_s = COALESCE($6, interval_min_s),
                interval_max_s = COALESCE($7, interval_max_s),
                daily_limit_per_instance = COALESCE($8, daily_limit_per_instance),
                pause_on_health_below = COALESCE($9, pause_on_health_below),
                schedule = COALESCE($10, schedule),
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.rotation_mode.map(|m| m.to_string()))
        .bind(input.interval_min_s)
        .bind(input.interval_max_s)
        .bind(input.daily_limit_per_instance)
        .bind(input.pause_on_health_below)
        .bind(schedule)
        .fetch_optional(&self.pool)
        .await
    }

    /// Delete a campaign. Only drafts can be deleted.
    pub async fn delete(&self, id: CampaignId, tenant_id: TenantId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM campaigns WHERE id = $1 AND tenant_id = $2 AND status = 'draft'",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Transition draft -> running
    pub async fn start(&self, id: CampaignId) -> Result<Option<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = 'running',
                is_paused = FALSE,
                auto_pause_reason = NULL,
                started_at = COALESCE(started_at, NOW()),
                updated_at = NOW()
            WHERE id = $1 AND status = 'draft'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Pause a running campaign. Used both by operators and by the
    /// engine when it pauses a campaign on its own; the reason is kept
    /// for the stats surface.
    pub async fn pause(
        &self,
        id: CampaignId,
        reason: Option<&str>,
    ) -> Result<Option<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = 'paused',
                is_paused = TRUE,
                auto_pause_reason = $2,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await
    }

    /// Resume a paused campaign, clearing any stored pause reason
    pub async fn resume(&self, id: CampaignId) -> Result<Option<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = 'running',
                is_paused = FALSE,
                auto_pause_reason = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'paused'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Cancel a campaign from any non-terminal state
    pub async fn cancel(&self, id: CampaignId) -> Result<Option<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = 'cancelled',
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('draft', 'running', 'paused')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Mark a running campaign completed. Returns None when the
    /// campaign was cancelled or paused in the meantime.
    pub async fn complete(&self, id: CampaignId) -> Result<Option<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = 'completed',
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Touch the dispatcher heartbeat and return the fresh row in one
    /// round trip. The dispatcher reacts to whatever state it sees here.
    pub async fn heartbeat(&self, id: CampaignId) -> Result<Option<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                last_heartbeat_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Persist the next planned send time so operators can see when the
    /// campaign will fire again
    pub async fn set_next_scheduled_send(
        &self,
        id: CampaignId,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                next_scheduled_send_at = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist the round-robin cursor position
    pub async fn set_rotation_cursor(
        &self,
        id: CampaignId,
        cursor: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                rotation_cursor = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(cursor)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count one accepted send. The sent counter only ever grows; later
    /// delivery failures are tracked separately.
    pub async fn record_message_sent(&self, id: CampaignId) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                messages_sent = messages_sent + 1,
                last_send_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count one delivery receipt
    pub async fn record_message_delivered(&self, id: CampaignId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE campaigns SET messages_delivered = messages_delivered + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count one read receipt
    pub async fn record_message_read(&self, id: CampaignId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE campaigns SET messages_read = messages_read + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count one failed message
    pub async fn record_message_failed(&self, id: CampaignId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE campaigns SET messages_failed = messages_failed + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Recount the attached contacts after an attach batch
    pub async fn recount_total_contacts(&self, id: CampaignId) -> Result<i32, sqlx::Error> {
        let row: (i32,) = sqlx::query_as(
            r#"
            UPDATE campaigns SET
                total_contacts = (
                    SELECT COUNT(*)::int FROM campaign_contacts WHERE campaign_id = $1
                ),
                updated_at = NOW()
            WHERE id = $1
            RETURNING total_contacts
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// List running, unpaused campaigns across all tenants. Used on
    /// startup to re-adopt dispatch loops that died with a previous
    /// process.
    pub async fn list_running(&self) -> Result<Vec<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE status = 'running' AND is_paused = FALSE
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Count campaigns by tenant
    pub async fn count_by_tenant(
        &self,
        tenant_id: TenantId,
        status: Option<CampaignStatus>,
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) = if let Some(status) = status {
            sqlx::query_as(
                "SELECT COUNT(*) FROM campaigns WHERE tenant_id = $1 AND status = $2",
            )
            .bind(tenant_id)
            .bind(status.to_string())
            .fetch_one(&self.pool)
            .await?
        } else {
            sqlx::query_as("SELECT COUNT(*) FROM campaigns WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await?
        };
        Ok(count.0)
    }
}
