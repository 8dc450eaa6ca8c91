//! Contact repository

use disparo_common::types::{ContactId, TenantId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Contact, CreateContact};

/// Contact repository
#[derive(Clone)]
pub struct ContactRepository {
    pool: PgPool,
}

impl ContactRepository {
    /// Create a new contact repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a contact, or refresh name and custom fields when the
    /// phone number already exists for this tenant
    pub async fn upsert(&self, input: CreateContact) -> Result<Contact, sqlx::Error> {
        let id = Uuid::new_v4();
        let custom_fields = input.custom_fields.unwrap_or_else(|| serde_json::json!({}));

        sqlx::query_as::<_, Contact>(
            r#"
            INSERT INTO contacts (id, tenant_id, phone, name, custom_fields)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, phone) DO UPDATE SET
                name = COALESCE(EXCLUDED.name, contacts.name),
                custom_fields = EXCLUDED.custom_fields,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.tenant_id)
        .bind(&input.phone)
        .bind(&input.name)
        .bind(&custom_fields)
        .fetch_one(&self.pool)
        .await
    }

    /// Upsert a batch of contacts in a single transaction
    pub async fn upsert_batch(
        &self,
        inputs: Vec<CreateContact>,
    ) -> Result<Vec<Contact>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut contacts = Vec::with_capacity(inputs.len());

        for input in inputs {
            let id = Uuid::new_v4();
            let custom_fields = input.custom_fields.unwrap_or_else(|| serde_json::json!({}));

            let contact = sqlx::query_as::<_, Contact>(
                r#"
                INSERT INTO contacts (id, tenant_id, phone, name, custom_fields)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (tenant_id, phone) DO UPDATE SET
                    name = COALESCE(EXCLUDED.name, contacts.name),
                    custom_fields = EXCLUDED.custom_fields,
                    updated_at = NOW()
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(input.tenant_id)
            .bind(&input.phone)
            .bind(&input.name)
            .bind(&custom_fields)
            .fetch_one(&mut *tx)
            .await?;

            contacts.push(contact);
        }

        tx.commit().await?;
        Ok(contacts)
    }

    /// Get a contact by ID
    pub async fn get(&self, id: ContactId) -> Result<Option<Contact>, sqlx::Error> {
        sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Get a contact by ID and tenant
    pub async fn get_by_tenant(
        &self,
        tenant_id: TenantId,
        id: ContactId,
    ) -> Result<Option<Contact>, sqlx::Error> {
        sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Find a contact by phone number
    pub async fn find_by_phone(
        &self,
        tenant_id: TenantId,
        phone: &str,
    ) -> Result<Option<Contact>, sqlx::Error> {
        sqlx::query_as::<_, Contact>(
            "SELECT * FROM contacts WHERE tenant_id = $1 AND phone = $2",
        )
        .bind(tenant_id)
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
    }

    /// List contacts for a tenant
    pub async fn list_by_tenant(
        &self,
        tenant_id: TenantId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Contact>, sqlx::Error> {
        sqlx::query_as::<_, Contact>(
            r#"
            SELECT * FROM contacts
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

    /// Count contacts for a tenant
    pub async fn count_by_tenant(&self, tenant_id: TenantId) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM contacts WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Delete a contact
    pub async fn delete(&self, id: ContactId, tenant_id: TenantId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM contacts WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
