//! Contact handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use disparo_common::types::PhoneNumber;
use disparo_storage::models::{Contact, CreateContact};
use disparo_storage::repository::ContactRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::{error_response, forbidden, internal_error, ApiError};
use crate::auth::{require_tenant_access, AppState, AuthContext};

/// Contact payload for create and bulk-create
#[derive(Debug, Deserialize)]
pub struct ContactPayload {
    pub phone: String,
    pub name: Option<String>,
    pub custom_fields: Option<serde_json::Value>,
}

/// Accepts either a single contact object or an array of them
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CreateContactsRequest {
    Many(Vec<ContactPayload>),
    One(ContactPayload),
}

/// Contact response
#[derive(Debug, Serialize)]
pub struct ContactResponse {
    pub id: Uuid,
    pub phone: String,
    pub name: Option<String>,
    pub custom_fields: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Contact> for ContactResponse {
    fn from(c: Contact) -> Self {
        Self {
            id: c.id,
            phone: c.phone,
            name: c.name,
            custom_fields: c.custom_fields,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// Query parameters for listing contacts
#[derive(Debug, Deserialize)]
pub struct ListContactsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Contact list response
#[derive(Debug, Serialize)]
pub struct ContactListResponse {
    pub data: Vec<ContactResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

fn normalize(tenant_id: Uuid, payload: ContactPayload) -> Result<CreateContact, ApiError> {
    let phone = PhoneNumber::parse(&payload.phone).ok_or_else(|| {
        error_response(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!("Invalid phone number: {}", payload.phone),
        )
    })?;
    Ok(CreateContact {
        tenant_id,
        phone: phone.as_str().to_string(),
        name: payload.name,
        custom_fields: payload.custom_fields,
    })
}

/// Upsert contacts. A single object creates one contact; an array
/// creates a batch. Phones are normalized to E.164 before storage.
///
/// POST /api/v1/tenants/:tenant_id/contacts
pub async fn create_contacts(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(tenant_id): Path<Uuid>,
    Json(input): Json<CreateContactsRequest>,
) -> Result<Response, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    let repo = ContactRepository::new(state.db_pool.pool().clone());

    match input {
        CreateContactsRequest::One(payload) => {
            let contact = repo
                .upsert(normalize(tenant_id, payload)?)
                .await
                .map_err(|e| {
                    error!("Failed to upsert contact: {}", e);
                    internal_error("Failed to upsert contact")
                })?;
            Ok((StatusCode::CREATED, Json(ContactResponse::from(contact))).into_response())
        }
        CreateContactsRequest::Many(payloads) => {
            if payloads.is_empty() {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    "contact list must not be empty",
                ));
            }
            let inputs = payloads
                .into_iter()
                .map(|p| normalize(tenant_id, p))
                .collect::<Result<Vec<_>, _>>()?;
            let contacts = repo.upsert_batch(inputs).await.map_err(|e| {
                error!("Failed to upsert contacts: {}", e);
                internal_error("Failed to upsert contacts")
            })?;
            let data: Vec<ContactResponse> =
                contacts.into_iter().map(ContactResponse::from).collect();
            Ok((StatusCode::CREATED, Json(data)).into_response())
        }
    }
}

/// List contacts for a tenant
///
/// GET /api/v1/tenants/:tenant_id/contacts
pub async fn list_contacts(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<ListContactsQuery>,
) -> Result<Json<ContactListResponse>, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    let repo = ContactRepository::new(state.db_pool.pool().clone());
    let contacts = repo
        .list_by_tenant(tenant_id, query.limit, query.offset)
        .await
        .map_err(|e| {
            error!("Failed to list contacts: {}", e);
            internal_error("Failed to list contacts")
        })?;
    let total = repo.count_by_tenant(tenant_id).await.unwrap_or(0);

    Ok(Json(ContactListResponse {
        data: contacts.into_iter().map(ContactResponse::from).collect(),
        total,
        limit: query.limit,
        offset: query.offset,
    }))
}
