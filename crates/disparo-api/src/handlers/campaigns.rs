//! Campaign handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use disparo_common::types::ScheduleSpec;
use disparo_storage::models::{
    Campaign, CampaignLog, CampaignStats, CampaignStatus, CreateCampaign, RotationMode,
    UpdateCampaign,
};
use disparo_storage::repository::CampaignRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::{campaign_error, forbidden, internal_error, ApiError};
use crate::auth::{require_tenant_access, AppState, AuthContext};

/// Query parameters for listing campaigns
#[derive(Debug, Deserialize)]
pub struct ListCampaignsQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Campaign list response
#[derive(Debug, Serialize)]
pub struct CampaignListResponse {
    pub data: Vec<CampaignResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Campaign response
#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub rotation_mode: String,
    pub interval_min_s: i32,
    pub interval_max_s: i32,
    pub daily_limit_per_instance: i32,
    pub pause_on_health_below: i32,
    pub schedule: ScheduleSpec,
    pub total_contacts: i32,
    pub messages_sent: i32,
    pub messages_delivered: i32,
    pub messages_read: i32,
    pub messages_failed: i32,
    pub progress_percentage: f64,
    pub is_paused: bool,
    pub auto_pause_reason: Option<String>,
    pub next_scheduled_send_at: Option<DateTime<Utc>>,
    pub last_send_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Campaign> for CampaignResponse {
    fn from(c: Campaign) -> Self {
        let progress_percentage = c.progress_percentage();
        Self {
            id: c.id,
            name: c.name,
            description: c.description,
            status: c.status,
            rotation_mode: c.rotation_mode,
            interval_min_s: c.interval_min_s,
            interval_max_s: c.interval_max_s,
            daily_limit_per_instance: c.daily_limit_per_instance,
            pause_on_health_below: c.pause_on_health_below,
            schedule: c.schedule.0,
            total_contacts: c.total_contacts,
            messages_sent: c.messages_sent,
            messages_delivered: c.messages_delivered,
            messages_read: c.messages_read,
            messages_failed: c.messages_failed,
            progress_percentage,
            is_paused: c.is_paused,
            auto_pause_reason: c.auto_pause_reason,
            next_scheduled_send_at: c.next_scheduled_send_at,
            last_send_at: c.last_send_at,
            started_at: c.started_at,
            completed_at: c.completed_at,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// Request body for creating a campaign
#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub description: Option<String>,
    pub rotation_mode: Option<RotationMode>,
    pub interval_min_s: i32,
    pub interval_max_s: i32,
    pub daily_limit_per_instance: Option<i32>,
    pub pause_on_health_below: Option<i32>,
    pub schedule: ScheduleSpec,
}

/// Request body for updating a campaign
#[derive(Debug, Deserialize)]
pub struct UpdateCampaignRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub rotation_mode: Option<RotationMode>,
    pub interval_min_s: Option<i32>,
    pub interval_max_s: Option<i32>,
    pub daily_limit_per_instance: Option<i32>,
    pub pause_on_health_below: Option<i32>,
    pub schedule: Option<ScheduleSpec>,
}

/// Request body for pausing a campaign
#[derive(Debug, Deserialize)]
pub struct PauseCampaignRequest {
    pub reason: Option<String>,
}

/// Query parameters for tailing campaign logs
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

/// Request body for attaching contacts
#[derive(Debug, Deserialize)]
pub struct AttachContactsRequest {
    pub contact_ids: Vec<Uuid>,
}

/// Attach outcome
#[derive(Debug, Serialize)]
pub struct AttachContactsResponse {
    pub requested: usize,
    pub attached: u64,
}

/// List campaigns for a tenant
///
/// GET /api/v1/tenants/:tenant_id/campaigns
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<ListCampaignsQuery>,
) -> Result<Json<CampaignListResponse>, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    let repo = CampaignRepository::new(state.db_pool.pool().clone());
    let status = query.status.and_then(|s| s.parse::<CampaignStatus>().ok());

    let campaigns = repo
        .list_by_tenant(tenant_id, status, query.limit, query.offset)
        .await
        .map_err(|e| {
            error!("Failed to list campaigns: {}", e);
            internal_error("Failed to list campaigns")
        })?;

    let total = repo.count_by_tenant(tenant_id, status).await.unwrap_or(0);

    let data = campaigns.into_iter().map(CampaignResponse::from).collect();

    Ok(Json(CampaignListResponse {
        data,
        total,
        limit: query.limit,
        offset: query.offset,
    }))
}

/// Create a new campaign in draft status
///
/// POST /api/v1/tenants/:tenant_id/campaigns
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(tenant_id): Path<Uuid>,
    Json(input): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<CampaignResponse>), ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    if input.name.trim().is_empty() {
        return Err(super::error_response(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "Campaign name is required",
        ));
    }

    let campaign = state
        .manager
        .create_campaign(CreateCampaign {
            tenant_id,
            name: input.name,
            description: input.description,
            rotation_mode: input.rotation_mode.unwrap_or(RotationMode::RoundRobin),
            interval_min_s: input.interval_min_s,
            interval_max_s: input.interval_max_s,
            daily_limit_per_instance: input.daily_limit_per_instance,
            pause_on_health_below: input.pause_on_health_below,
            schedule: input.schedule,
        })
        .await
        .map_err(campaign_error)?;

    Ok((StatusCode::CREATED, Json(campaign.into())))
}

/// Get a campaign
///
/// GET /api/v1/tenants/:tenant_id/campaigns/:campaign_id
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignResponse>, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    let campaign = state
        .manager
        .get_campaign(tenant_id, campaign_id)
        .await
        .map_err(campaign_error)?;

    Ok(Json(campaign.into()))
}

/// Update a draft campaign
///
/// PUT /api/v1/tenants/:tenant_id/campaigns/:campaign_id
pub async fn update_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<UpdateCampaignRequest>,
) -> Result<Json<CampaignResponse>, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    let campaign = state
        .manager
        .update_campaign(
            tenant_id,
            campaign_id,
            UpdateCampaign {
                name: input.name,
                description: input.description,
                rotation_mode: input.rotation_mode,
                interval_min_s: input.interval_min_s,
                interval_max_s: input.interval_max_s,
                daily_limit_per_instance: input.daily_limit_per_instance,
                pause_on_health_below: input.pause_on_health_below,
                schedule: input.schedule,
            },
        )
        .await
        .map_err(campaign_error)?;

    Ok(Json(campaign.into()))
}

/// Delete a draft campaign
///
/// DELETE /api/v1/tenants/:tenant_id/campaigns/:campaign_id
pub async fn delete_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    state
        .manager
        .delete_campaign(tenant_id, campaign_id)
        .await
        .map_err(campaign_error)?;

    Ok(StatusCode::NO_CONTENT)
}

/// Start a draft campaign
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/start
pub async fn start_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignResponse>, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    let campaign = state
        .manager
        .start_campaign(tenant_id, campaign_id)
        .await
        .map_err(campaign_error)?;

    Ok(Json(campaign.into()))
}

/// Pause a running campaign
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/pause
pub async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
    body: Option<Json<PauseCampaignRequest>>,
) -> Result<Json<CampaignResponse>, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    let reason = body.and_then(|Json(b)| b.reason);

    let campaign = state
        .manager
        .pause_campaign(tenant_id, campaign_id, reason)
        .await
        .map_err(campaign_error)?;

    Ok(Json(campaign.into()))
}

/// Resume a paused campaign
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/resume
pub async fn resume_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignResponse>, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    let campaign = state
        .manager
        .resume_campaign(tenant_id, campaign_id)
        .await
        .map_err(campaign_error)?;

    Ok(Json(campaign.into()))
}

/// Cancel a campaign
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/cancel
pub async fn cancel_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignResponse>, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    let campaign = state
        .manager
        .cancel_campaign(tenant_id, campaign_id)
        .await
        .map_err(campaign_error)?;

    Ok(Json(campaign.into()))
}

/// Get campaign statistics
///
/// GET /api/v1/tenants/:tenant_id/campaigns/:campaign_id/stats
pub async fn get_campaign_stats(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignStats>, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    let stats = state
        .manager
        .get_stats(tenant_id, campaign_id)
        .await
        .map_err(campaign_error)?;

    Ok(Json(stats))
}

/// Tail the campaign audit log, newest first
///
/// GET /api/v1/tenants/:tenant_id/campaigns/:campaign_id/logs?limit=
pub async fn get_campaign_logs(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<CampaignLog>>, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    let limit = query.limit.clamp(1, 500);
    let logs = state
        .manager
        .get_logs(tenant_id, campaign_id, limit)
        .await
        .map_err(campaign_error)?;

    Ok(Json(logs))
}

/// Attach contacts to a campaign
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/contacts
pub async fn attach_contacts(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<AttachContactsRequest>,
) -> Result<(StatusCode, Json<AttachContactsResponse>), ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    if input.contact_ids.is_empty() {
        return Err(super::error_response(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "contact_ids must not be empty",
        ));
    }

    let attached = state
        .manager
        .attach_contacts(tenant_id, campaign_id, &input.contact_ids)
        .await
        .map_err(campaign_error)?;

    Ok((
        StatusCode::CREATED,
        Json(AttachContactsResponse {
            requested: input.contact_ids.len(),
            attached,
        }),
    ))
}
