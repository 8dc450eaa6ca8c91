//! Campaign contact repository
//!
//! Rows here move through a one-way status machine (pending, sending,
//! sent, delivered, read / failed / skipped). Every transition is a
//! conditional UPDATE guarded on the expected current status, so
//! concurrent workers and duplicated webhook events collapse into
//! exactly one effective change.

use disparo_common::types::{CampaignContactId, CampaignId, ContactId, TenantId, VariantId};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::CampaignContact;

/// Per-status counts for one campaign
#[derive(Debug, Clone, Copy, Default)]
pub struct CampaignContactCounts {
    pub pending: i64,
    pub sending: i64,
    pub sent: i64,
    pub delivered: i64,
    pub read: i64,
    pub failed: i64,
    pub skipped: i64,
}

impl CampaignContactCounts {
    pub fn total(&self) -> i64 {
        self.pending
            + self.sending
            + self.sent
            + self.delivered
            + self.read
            + self.failed
            + self.skipped
    }
}

/// Campaign contact repository
#[derive(Clone)]
pub struct CampaignContactRepository {
    pool: PgPool,
}

impl CampaignContactRepository {
    /// Create a new campaign contact repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attach contacts to a campaign. Already-attached contacts are
    /// skipped silently. Returns the number of rows actually inserted.
    pub async fn attach_batch(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
        contact_ids: &[ContactId],
    ) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for contact_id in contact_ids {
            let result = sqlx::query(
                r#"
                INSERT INTO campaign_contacts (id, tenant_id, campaign_id, contact_id, status)
                VALUES ($1, $2, $3, $4, 'pending')
                ON CONFLICT (campaign_id, contact_id) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(tenant_id)
            .bind(campaign_id)
            .bind(contact_id)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Get a row by ID
    pub async fn get(&self, id: CampaignContactId) -> Result<Option<CampaignContact>, sqlx::Error> {
        sqlx::query_as::<_, CampaignContact>("SELECT * FROM campaign_contacts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Atomically claim the oldest pending contact of a campaign,
    /// moving it to sending. Returns None when nothing is pending.
    /// SKIP LOCKED keeps concurrent dispatchers from blocking on each
    /// other.
    pub async fn claim_next_pending(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
    ) -> Result<Option<CampaignContact>, sqlx::Error> {
        sqlx::query_as::<_, CampaignContact>(
            r#"
            UPDATE campaign_contacts SET
                status = 'sending',
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM campaign_contacts
                WHERE tenant_id = $1 AND campaign_id = $2 AND status = 'pending'
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Re-claim a specific row for a retry attempt. Fails when the row
    /// is no longer pending, which means another dispatch path got
    /// there first and owns the send now.
    pub async fn claim_for_retry(&self, id: CampaignContactId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts SET
                status = 'sending',
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Put a claimed contact back into the pending pool. Only valid
    /// while the row is still sending.
    pub async fn revert_to_pending(&self, id: CampaignContactId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts SET
                status = 'pending',
                updated_at = NOW()
            WHERE id = $1 AND status = 'sending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record an accepted send: stamps the variant, carrier instance
    /// and the gateway message ID used for later receipt matching
    pub async fn mark_sent(
        &self,
        id: CampaignContactId,
        variant_id: VariantId,
        instance_name: &str,
        external_msg_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts SET
                status = 'sent',
                sent_at = NOW(),
                variant_used = $2,
                instance_used = $3,
                external_msg_id = $4,
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'sending'
            "#,
        )
        .bind(id)
        .bind(variant_id)
        .bind(instance_name)
        .bind(external_msg_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a permanent send failure before the message left
    pub async fn mark_failed(
        &self,
        id: CampaignContactId,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts SET
                status = 'failed',
                error_message = $2,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'sending')
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a retryable send failure. The row returns to pending
    /// until the retry budget runs out, after which it fails for good.
    /// Returns the updated row so the caller can see which way it went.
    pub async fn record_transient_failure(
        &self,
        id: CampaignContactId,
        error: &str,
        max_retries: i32,
    ) -> Result<Option<CampaignContact>, sqlx::Error> {
        sqlx::query_as::<_, CampaignContact>(
            r#"
            UPDATE campaign_contacts SET
                retry_count = retry_count + 1,
                error_message = $2,
                status = CASE
                    WHEN retry_count + 1 >= $3 THEN 'failed'
                    ELSE 'pending'
                END,
                updated_at = NOW()
            WHERE id = $1 AND status = 'sending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(max_retries)
        .fetch_optional(&self.pool)
        .await
    }

    /// Find the row a gateway receipt refers to. The caller resolves
    /// the tenant from the instance name first.
    pub async fn find_by_external_id(
        &self,
        tenant_id: TenantId,
        instance_name: &str,
        external_msg_id: &str,
    ) -> Result<Option<CampaignContact>, sqlx::Error> {
        sqlx::query_as::<_, CampaignContact>(
            r#"
            SELECT * FROM campaign_contacts
            WHERE tenant_id = $1 AND instance_used = $2 AND external_msg_id = $3
            "#,
        )
        .bind(tenant_id)
        .bind(instance_name)
        .bind(external_msg_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Apply a delivery receipt. Only a sent row can become delivered,
    /// which makes replayed receipts no-ops.
    pub async fn mark_delivered(&self, id: CampaignContactId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts SET
                status = 'delivered',
                updated_at = NOW()
            WHERE id = $1 AND status = 'sent'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Apply a read receipt. A read receipt can arrive before the
    /// delivery receipt, so both sent and delivered rows qualify.
    pub async fn mark_read(&self, id: CampaignContactId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts SET
                status = 'read',
                updated_at = NOW()
            WHERE id = $1 AND status IN ('sent', 'delivered')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Apply a gateway-reported delivery failure for a message that was
    /// already accepted
    pub async fn mark_failed_after_send(
        &self,
        id: CampaignContactId,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts SET
                status = 'failed',
                error_message = $2,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('sent', 'delivered')
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Put rows stuck in sending back into the pending pool. A row is
    /// stuck when a worker died between claiming and resolving it.
    pub async fn recover_stuck_sending(
        &self,
        threshold_secs: i64,
    ) -> Result<Vec<CampaignContact>, sqlx::Error> {
        sqlx::query_as::<_, CampaignContact>(
            r#"
            UPDATE campaign_contacts SET
                status = 'pending',
                updated_at = NOW()
            WHERE status = 'sending'
              AND updated_at < NOW() - make_interval(secs => $1::double precision)
            RETURNING *
            "#,
        )
        .bind(threshold_secs)
        .fetch_all(&self.pool)
        .await
    }

    /// List rows of a campaign, optionally filtered by status
    pub async fn list_by_campaign(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CampaignContact>, sqlx::Error> {
        if let Some(status) = status {
            sqlx::query_as::<_, CampaignContact>(
                r#"
                SELECT * FROM campaign_contacts
                WHERE tenant_id = $1 AND campaign_id = $2 AND status = $3
                ORDER BY created_at ASC, id ASC
                LIMIT $4 OFFSET $5
                "#,
            )
            .bind(tenant_id)
            .bind(campaign_id)
            .bind(status)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, CampaignContact>(
                r#"
                SELECT * FROM campaign_contacts
                WHERE tenant_id = $1 AND campaign_id = $2
                ORDER BY created_at ASC, id ASC
                LIMIT $3 OFFSET $4
                "#,
            )
            .bind(tenant_id)
            .bind(campaign_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        }
    }

    /// Count rows of a campaign by status
    pub async fn status_counts(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
    ) -> Result<CampaignContactCounts, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'sending') AS sending,
                COUNT(*) FILTER (WHERE status = 'sent') AS sent,
                COUNT(*) FILTER (WHERE status = 'delivered') AS delivered,
                COUNT(*) FILTER (WHERE status = 'read') AS read,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'skipped') AS skipped
            FROM campaign_contacts
            WHERE tenant_id = $1 AND campaign_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(CampaignContactCounts {
            pending: row.get::<Option<i64>, _>("pending").unwrap_or(0),
            sending: row.get::<Option<i64>, _>("sending").unwrap_or(0),
            sent: row.get::<Option<i64>, _>("sent").unwrap_or(0),
            delivered: row.get::<Option<i64>, _>("delivered").unwrap_or(0),
            read: row.get::<Option<i64>, _>("read").unwrap_or(0),
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
            skipped: row.get::<Option<i64>, _>("skipped").unwrap_or(0),
        })
    }

    /// Count contacts still waiting to be sent
    pub async fn count_pending(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM campaign_contacts
            WHERE tenant_id = $1 AND campaign_id = $2 AND status = 'pending'
            "#,
        )
        .bind(tenant_id)
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }
}
