//! Job queue repository
//!
//! A small Postgres-backed queue. Claiming uses FOR UPDATE SKIP LOCKED
//! so any number of workers can pull from the same queue without
//! double-processing a job.

use disparo_common::types::{JobId, TenantId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Job;

/// Job queue repository
#[derive(Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    /// Create a new job repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue a job for execution at or after `delay_secs` from now
    pub async fn enqueue(
        &self,
        tenant_id: TenantId,
        queue: &str,
        payload: serde_json::Value,
        delay_secs: i64,
        max_attempts: i32,
    ) -> Result<Job, sqlx::Error> {
        let id = Uuid::now_v7();

        sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (
                id, tenant_id, queue, payload, status, max_attempts, scheduled_at
            )
            VALUES ($1, $2, $3, $4, 'pending', $5,
                    NOW() + make_interval(secs => $6::double precision))
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(queue)
        .bind(&payload)
        .bind(max_attempts)
        .bind(delay_secs)
        .fetch_one(&self.pool)
        .await
    }

    /// Get a job by ID
    pub async fn get(&self, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Claim up to `limit` due jobs from a queue, moving them to
    /// processing and counting the attempt
    pub async fn claim_batch(&self, queue: &str, limit: i64) -> Result<Vec<Job>, sqlx::Error> {
        sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs SET
                status = 'processing',
                attempts = attempts + 1,
                started_at = NOW()
            WHERE id IN (
                SELECT id FROM jobs
                WHERE queue = $1 AND status = 'pending' AND scheduled_at <= NOW()
                ORDER BY scheduled_at ASC, id ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(queue)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Mark a job completed
    pub async fn complete(&self, id: JobId) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'completed',
                completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Put a job back into the queue for a later retry
    pub async fn schedule_retry(
        &self,
        id: JobId,
        error: &str,
        delay_secs: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'pending',
                last_error = $2,
                scheduled_at = NOW() + make_interval(secs => $3::double precision)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(delay_secs)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a job failed for good
    pub async fn mark_failed(&self, id: JobId, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'failed',
                last_error = $2,
                completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Copy an exhausted job onto its queue's dead letter sibling. The
    /// original payload is preserved with the failure context merged in.
    pub async fn dead_letter(&self, job: &Job, error: &str) -> Result<Job, sqlx::Error> {
        let id = Uuid::now_v7();
        let queue = format!("{}.deadletter", job.queue);

        sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (id, tenant_id, queue, payload, status, max_attempts, scheduled_at)
            VALUES (
                $1, $2, $3,
                $4::jsonb || jsonb_build_object('error', $5::text, 'failed_at', NOW()),
                'pending', 1, NOW()
            )
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(job.tenant_id)
        .bind(&queue)
        .bind(&job.payload)
        .bind(error)
        .fetch_one(&self.pool)
        .await
    }

    /// Count jobs in a queue by status
    pub async fn count_by_status(&self, queue: &str, status: &str) -> Result<i64, sqlx::Error> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE queue = $1 AND status = $2")
                .bind(queue)
                .bind(status)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }

    /// Delete completed jobs older than the retention window
    pub async fn purge_completed(&self, days: i32) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status = 'completed'
              AND completed_at < NOW() - make_interval(days => $1)
            "#,
        )
        .bind(days)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
