//! Gateway instance handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use disparo_storage::models::{CreateInstance, Instance, UpdateInstance};
use disparo_storage::repository::InstanceRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::{error_response, forbidden, internal_error, ApiError};
use crate::auth::{require_tenant_access, AppState, AuthContext};

/// Instance response. The gateway API key never leaves the server.
#[derive(Debug, Serialize)]
pub struct InstanceResponse {
    pub id: Uuid,
    pub name: String,
    pub gateway_name: String,
    pub base_url: String,
    pub connection_state: String,
    pub health_score: i32,
    pub msgs_sent_today: i32,
    pub last_reset_date: Option<NaiveDate>,
    pub timezone: String,
    pub default_department: Option<String>,
    pub last_check_error: Option<String>,
    pub consecutive_check_failures: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Instance> for InstanceResponse {
    fn from(i: Instance) -> Self {
        Self {
            id: i.id,
            name: i.name,
            gateway_name: i.gateway_name,
            base_url: i.base_url,
            connection_state: i.connection_state,
            health_score: i.health_score,
            msgs_sent_today: i.msgs_sent_today,
            last_reset_date: i.last_reset_date,
            timezone: i.timezone,
            default_department: i.default_department,
            last_check_error: i.last_check_error,
            consecutive_check_failures: i.consecutive_check_failures,
            created_at: i.created_at,
            updated_at: i.updated_at,
        }
    }
}

/// Request body for registering an instance
#[derive(Debug, Deserialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub gateway_name: String,
    pub base_url: String,
    pub api_key: String,
    pub timezone: Option<String>,
    pub default_department: Option<String>,
}

/// Request body for updating an instance
#[derive(Debug, Deserialize)]
pub struct UpdateInstanceRequest {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timezone: Option<String>,
    pub default_department: Option<String>,
}

/// Register a gateway instance
///
/// POST /api/v1/tenants/:tenant_id/instances
pub async fn create_instance(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(tenant_id): Path<Uuid>,
    Json(input): Json<CreateInstanceRequest>,
) -> Result<(StatusCode, Json<InstanceResponse>), ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    for (field, value) in [
        ("name", &input.name),
        ("gateway_name", &input.gateway_name),
        ("base_url", &input.base_url),
        ("api_key", &input.api_key),
    ] {
        if value.trim().is_empty() {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "validation_error",
                format!("{} is required", field),
            ));
        }
    }

    let repo = InstanceRepository::new(state.db_pool.pool().clone());
    let instance = repo
        .create(CreateInstance {
            tenant_id,
            name: input.name,
            gateway_name: input.gateway_name,
            base_url: input.base_url,
            api_key: input.api_key,
            timezone: input.timezone,
            default_department: input.default_department,
        })
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => error_response(
                StatusCode::CONFLICT,
                "conflict",
                "gateway_name already in use",
            ),
            _ => {
                error!("Failed to create instance: {}", e);
                internal_error("Failed to create instance")
            }
        })?;

    Ok((StatusCode::CREATED, Json(instance.into())))
}

/// List all instances for a tenant
///
/// GET /api/v1/tenants/:tenant_id/instances
pub async fn list_instances(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<InstanceResponse>>, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    let repo = InstanceRepository::new(state.db_pool.pool().clone());
    let instances = repo.list_by_tenant(tenant_id).await.map_err(|e| {
        error!("Failed to list instances: {}", e);
        internal_error("Failed to list instances")
    })?;

    Ok(Json(instances.into_iter().map(InstanceResponse::from).collect()))
}

/// Get an instance
///
/// GET /api/v1/tenants/:tenant_id/instances/:instance_id
pub async fn get_instance(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, instance_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<InstanceResponse>, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    let repo = InstanceRepository::new(state.db_pool.pool().clone());
    let instance = repo
        .get_by_tenant(instance_id, tenant_id)
        .await
        .map_err(|e| {
            error!("Failed to fetch instance: {}", e);
            internal_error("Failed to fetch instance")
        })?
        .ok_or_else(not_found)?;

    Ok(Json(instance.into()))
}

/// Update an instance's settings
///
/// PUT /api/v1/tenants/:tenant_id/instances/:instance_id
pub async fn update_instance(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, instance_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<UpdateInstanceRequest>,
) -> Result<Json<InstanceResponse>, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    let repo = InstanceRepository::new(state.db_pool.pool().clone());
    let instance = repo
        .update(
            instance_id,
            tenant_id,
            UpdateInstance {
                name: input.name,
                base_url: input.base_url,
                api_key: input.api_key,
                timezone: input.timezone,
                default_department: input.default_department,
            },
        )
        .await
        .map_err(|e| {
            error!("Failed to update instance: {}", e);
            internal_error("Failed to update instance")
        })?
        .ok_or_else(not_found)?;

    Ok(Json(instance.into()))
}

/// Remove an instance
///
/// DELETE /api/v1/tenants/:tenant_id/instances/:instance_id
pub async fn delete_instance(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, instance_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    let repo = InstanceRepository::new(state.db_pool.pool().clone());
    let deleted = repo.delete(instance_id, tenant_id).await.map_err(|e| {
        error!("Failed to delete instance: {}", e);
        internal_error("Failed to delete instance")
    })?;

    if !deleted {
        return Err(not_found());
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Poll the gateway for this instance's state right now
///
/// POST /api/v1/tenants/:tenant_id/instances/:instance_id/refresh
pub async fn refresh_instance(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, instance_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<InstanceResponse>, ApiError> {
    require_tenant_access(&auth, tenant_id).map_err(|_| forbidden())?;

    let repo = InstanceRepository::new(state.db_pool.pool().clone());
    let instance = repo
        .get_by_tenant(instance_id, tenant_id)
        .await
        .map_err(|e| {
            error!("Failed to fetch instance: {}", e);
            internal_error("Failed to fetch instance")
        })?
        .ok_or_else(not_found)?;

    if let Err(e) = state.poller.refresh_instance(&instance).await {
        error!("Instance refresh failed for {}: {}", instance.name, e);
        return Err(internal_error("Gateway state check failed"));
    }

    // Re-read to pick up the state the poll just wrote.
    let refreshed = repo
        .get_by_tenant(instance_id, tenant_id)
        .await
        .map_err(|e| {
            error!("Failed to fetch instance: {}", e);
            internal_error("Failed to fetch instance")
        })?
        .ok_or_else(not_found)?;

    Ok(Json(refreshed.into()))
}

fn not_found() -> ApiError {
    error_response(StatusCode::NOT_FOUND, "not_found", "Instance not found")
}
