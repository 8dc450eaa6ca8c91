//! Message variant handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use disparo_storage::models::{CreateVariant, MessageVariant, UpdateVariant};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::{campaign_error, forbidden, ApiError};
use crate::auth::{require_tenant_access, AppState, AuthContext};

/// Variant response
#[derive(Debug, Serialize)]
pub struct VariantResponse {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub variant_order: i32,
    pub text: String,
    pub is_active: bool,
    pub times_sent: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MessageVariant> for VariantResponse {
    fn from(v: MessageVariant) -> Self {
        Self {
            id: v.id,
            campaign_id: v.campaign_id,
            variant_order: v.variant_order,
            text: v.text,
            is_active: v.is_active,
            times_sent: v.times_sent,
            created_at: v.created_at,
            updated_at: v.updated_at,
        }
    }
}

/// Request body for adding a variant
#[derive(Debug, Deserialize)]
pub struct CreateVariantRequest {
    pub variant_order: i32,
    pub text: String,
    pub is_active: Option<bool>,
}

/// Request body for updating a variant
#[derive(Debug, Deserialize)]
pub struct UpdateVariantRequest {
    pub text: Option<String>,
    pub is_active: Option<bool>,
}

/// Add a message variant to a campaign
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/variants
pub async fn create_variant(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<CreateVariantRequest>,
) -> Result<(StatusCode, Json<VariantResponse>), ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    let variant = state
        .manager
        .add_variant(CreateVariant {
            tenant_id,
            campaign_id,
            variant_order: input.variant_order,
            text: input.text,
            is_active: input.is_active,
        })
        .await
        .map_err(campaign_error)?;

    Ok((StatusCode::CREATED, Json(variant.into())))
}

/// List the variants of a campaign, ordered by position
///
/// GET /api/v1/tenants/:tenant_id/campaigns/:campaign_id/variants
pub async fn list_variants(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<VariantResponse>>, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    let variants = state
        .manager
        .list_variants(tenant_id, campaign_id)
        .await
        .map_err(campaign_error)?;

    Ok(Json(variants.into_iter().map(VariantResponse::from).collect()))
}

/// Update a variant's text or active flag
///
/// PUT /api/v1/tenants/:tenant_id/campaigns/:campaign_id/variants/:variant_id
pub async fn update_variant(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, campaign_id, variant_id)): Path<(Uuid, Uuid, Uuid)>,
    Json(input): Json<UpdateVariantRequest>,
) -> Result<Json<VariantResponse>, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    let variant = state
        .manager
        .update_variant(
            tenant_id,
            campaign_id,
            variant_id,
            UpdateVariant {
                text: input.text,
                is_active: input.is_active,
            },
        )
        .await
        .map_err(campaign_error)?;

    Ok(Json(variant.into()))
}

/// Remove a variant from a campaign
///
/// DELETE /api/v1/tenants/:tenant_id/campaigns/:campaign_id/variants/:variant_id
pub async fn delete_variant(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, campaign_id, variant_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    state
        .manager
        .delete_variant(tenant_id, campaign_id, variant_id)
        .await
        .map_err(campaign_error)?;

    Ok(StatusCode::NO_CONTENT)
}
