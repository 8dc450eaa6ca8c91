//! Gateway webhook ingress
//!
//! The gateway retries rejected deliveries, so this endpoint
//! acknowledges anything it can parse and leaves failures to the
//! maintenance sweep. Only an unparseable body or a bad secret is
//! refused.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;
use tracing::error;

use disparo_engine::WebhookEvent;

use super::{error_response, ApiError};
use crate::auth::AppState;

const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Receive a gateway event
///
/// POST /api/v1/webhooks/gateway
pub async fn gateway_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    if !state.webhook_secret.is_empty() {
        let presented = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != state.webhook_secret {
            return Err(error_response(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Invalid webhook secret",
            ));
        }
    }

    let event: WebhookEvent = serde_json::from_slice(&body).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            "invalid_json",
            format!("Unparseable webhook body: {}", e),
        )
    })?;

    if let Err(e) = state.reconciler.process(event).await {
        error!("Webhook reconciliation failed: {}", e);
    }

    Ok(StatusCode::OK)
}
