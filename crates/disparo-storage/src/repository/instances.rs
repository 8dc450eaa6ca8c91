//! Instance repository
//!
//! Persistence for gateway instances, including the health score and
//! daily counter arithmetic the dispatch engine relies on. All score
//! adjustments happen in single UPDATE statements so concurrent workers
//! never lose increments.

use disparo_common::types::{InstanceId, TenantId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CreateInstance, Instance, UpdateInstance};

/// Fleet-wide eligibility breakdown for one tenant, used to explain why
/// no instance could be selected.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceFleetCounts {
    pub total: i64,
    pub connected: i64,
    pub healthy: i64,
}

/// Instance repository
#[derive(Clone)]
pub struct InstanceRepository {
    pool: PgPool,
}

impl InstanceRepository {
    /// Create a new instance repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a new instance
    pub async fn create(&self, input: CreateInstance) -> Result<Instance, sqlx::Error> {
        let id = Uuid::new_v4();

        sqlx::query_as::<_, Instance>(
            r#"
            INSERT INTO instances (
                id, tenant_id, name, gateway_name, base_url, api_key,
                connection_state, health_score, msgs_sent_today, timezone,
                default_department
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'closed', 100, 0, $7, $8)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.tenant_id)
        .bind(&input.name)
        .bind(&input.gateway_name)
        .bind(&input.base_url)
        .bind(&input.api_key)
        .bind(input.timezone.as_deref().unwrap_or("UTC"))
        .bind(&input.default_department)
        .fetch_one(&self.pool)
        .await
    }

    /// Get an instance by ID
    pub async fn get(&self, id: InstanceId) -> Result<Option<Instance>, sqlx::Error> {
        sqlx::query_as::<_, Instance>("SELECT * FROM instances WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Get an instance by ID and tenant
    pub async fn get_by_tenant(
        &self,
        tenant_id: TenantId,
        id: InstanceId,
    ) -> Result<Option<Instance>, sqlx::Error> {
        sqlx::query_as::<_, Instance>(
            "SELECT * FROM instances WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Resolve an instance by its gateway-side name. Gateway names are
    /// globally unique, which lets webhook events find their tenant.
    pub async fn get_by_gateway_name(
        &self,
        gateway_name: &str,
    ) -> Result<Option<Instance>, sqlx::Error> {
        sqlx::query_as::<_, Instance>("SELECT * FROM instances WHERE gateway_name = $1")
            .bind(gateway_name)
            .fetch_optional(&self.pool)
            .await
    }

    /// List instances for a tenant
    pub async fn list_by_tenant(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<Instance>, sqlx::Error> {
        sqlx::query_as::<_, Instance>(
            r#"
            SELECT * FROM instances
            WHERE tenant_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
    }

    /// List instances that a campaign may send through right now:
    /// connected, healthy enough and under the daily limit. A limit of
    /// zero means unlimited. The ordering is stable so rotation cursors
    /// stay meaningful across reads.
    pub async fn list_eligible(
        &self,
        tenant_id: TenantId,
        min_health: i32,
        daily_limit: i32,
    ) -> Result<Vec<Instance>, sqlx::Error> {
        sqlx::query_as::<_, Instance>(
            r#"
            SELECT * FROM instances
            WHERE tenant_id = $1
              AND connection_state = 'open'
              AND health_score >= $2
              AND ($3 = 0 OR msgs_sent_today < $3)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(tenant_id)
        .bind(min_health)
        .bind(daily_limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Count instances at each eligibility stage for one tenant
    pub async fn fleet_counts(
        &self,
        tenant_id: TenantId,
        min_health: i32,
    ) -> Result<InstanceFleetCounts, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE connection_state = 'open') AS connected,
                COUNT(*) FILTER (
                    WHERE connection_state = 'open' AND health_score >= $2
                ) AS healthy
            FROM instances
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .bind(min_health)
        .fetch_one(&self.pool)
        .await?;

        use sqlx::Row;
        Ok(InstanceFleetCounts {
            total: row.get::<Option<i64>, _>("total").unwrap_or(0),
            connected: row.get::<Option<i64>, _>("connected").unwrap_or(0),
            healthy: row.get::<Option<i64>, _>("healthy").unwrap_or(0),
        })
    }

    /// Update mutable instance settings
    pub async fn update(
        &self,
        id: InstanceId,
        tenant_id: TenantId,
        input: UpdateInstance,
    ) -> Result<Option<Instance>, sqlx::Error> {
        sqlx::query_as::<_, Instance>(
            r#"
            UPDATE instances SET
                name = COALESCE($3, name),
                base_url = COALESCE($4, base_url),
                api_key = COALESCE($5, api_key),
                timezone = COALESCE($6, timezone),
                default_department = COALESCE($7, default_department),
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(&input.name)
        .bind(&input.base_url)
        .bind(&input.api_key)
        .bind(&input.timezone)
        .bind(&input.default_department)
        .fetch_optional(&self.pool)
        .await
    }

    /// Delete an instance
    pub async fn delete(&self, id: InstanceId, tenant_id: TenantId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM instances WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record the outcome of one send attempt. Success bumps the daily
    /// counter and awards one health point for every tenth delivered
    /// message; failure costs five points. Scores stay within [0, 100].
    pub async fn record_send(&self, id: InstanceId, success: bool) -> Result<(), sqlx::Error> {
        if success {
            sqlx::query(
                r#"
                UPDATE instances SET
                    msgs_sent_today = msgs_sent_today + 1,
                    health_score = LEAST(
                        100,
                        health_score
                            + CASE WHEN (msgs_sent_today + 1) % 10 = 0 THEN 1 ELSE 0 END
                    ),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE instances SET
                    health_score = GREATEST(0, health_score - 5),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Record an authentication failure reported by the gateway
    pub async fn record_auth_failure(&self, id: InstanceId) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE instances SET
                health_score = GREATEST(0, health_score - 20),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Aggressive drop applied when an instance fails more than half
    /// of its recent sends
    pub async fn record_failure_streak(&self, id: InstanceId) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE instances SET
                health_score = GREATEST(0, health_score - 20),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Force the health score to an exact value (clamped to [0, 100])
    pub async fn set_health_score(&self, id: InstanceId, score: i32) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE instances SET
                health_score = LEAST(100, GREATEST(0, $2)),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Apply a successful connection state check. Clears the failure
    /// streak and any stored check error.
    pub async fn update_connection_state(
        &self,
        id: InstanceId,
        state: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE instances SET
                connection_state = $2,
                last_check_error = NULL,
                consecutive_check_failures = 0,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Force the error state with a recorded cause. Used when the check
    /// itself succeeded but the gateway's answer rules the instance out,
    /// so the failure streak resets.
    pub async fn mark_connection_error(
        &self,
        id: InstanceId,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE instances SET
                connection_state = 'error',
                last_check_error = $2,
                consecutive_check_failures = 0,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Apply a failed connection state check. The second consecutive
    /// failure flips the instance into the error state; a single blip
    /// leaves the last known state untouched.
    pub async fn record_check_failure(
        &self,
        id: InstanceId,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE instances SET
                last_check_error = $2,
                consecutive_check_failures = consecutive_check_failures + 1,
                connection_state = CASE
                    WHEN consecutive_check_failures + 1 >= 2 THEN 'error'
                    ELSE connection_state
                END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reset daily counters for every instance whose local calendar day
    /// has advanced past the recorded reset date. Idempotent: running it
    /// twice in the same local day is a no-op.
    pub async fn reset_daily_counters(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE instances SET
                msgs_sent_today = 0,
                last_reset_date = (NOW() AT TIME ZONE timezone)::date,
                updated_at = NOW()
            WHERE last_reset_date IS DISTINCT FROM (NOW() AT TIME ZONE timezone)::date
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Count instances for a tenant
    pub async fn count_by_tenant(&self, tenant_id: TenantId) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM instances WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// List every instance across tenants, used by the state poller
    pub async fn list_all(&self) -> Result<Vec<Instance>, sqlx::Error> {
        sqlx::query_as::<_, Instance>("SELECT * FROM instances ORDER BY created_at ASC, id ASC")
            .fetch_all(&self.pool)
            .await
    }
}
