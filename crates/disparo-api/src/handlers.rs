//! API request handlers

pub mod campaigns;
pub mod contacts;
pub mod health;
pub mod instances;
pub mod variants;
pub mod webhooks;

use axum::http::StatusCode;
use axum::Json;
use disparo_engine::CampaignError;
use serde::Serialize;
use tracing::error;

/// Error response body
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn error_response(
    status: StatusCode,
    error: &str,
    message: impl Into<String>,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

pub(crate) fn forbidden() -> ApiError {
    error_response(
        StatusCode::FORBIDDEN,
        "forbidden",
        "Not authorized for this tenant",
    )
}

pub(crate) fn internal_error(message: &str) -> ApiError {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
}

/// Map campaign manager errors onto HTTP statuses. State-machine and
/// validation violations are client errors; storage trouble is a 500
/// with the detail kept out of the response body.
pub(crate) fn campaign_error(e: CampaignError) -> ApiError {
    match &e {
        CampaignError::NotFound => {
            error_response(StatusCode::NOT_FOUND, "not_found", e.to_string())
        }
        CampaignError::Database(err) => {
            error!("Campaign operation failed: {}", err);
            internal_error("Campaign operation failed")
        }
        CampaignError::Internal(err) => {
            error!("Campaign operation failed: {}", err);
            internal_error("Campaign operation failed")
        }
        _ => error_response(StatusCode::BAD_REQUEST, "invalid_request", e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn campaign_errors_map_to_statuses() {
        assert_eq!(campaign_error(CampaignError::NotFound).0, StatusCode::NOT_FOUND);
        assert_eq!(campaign_error(CampaignError::NotDraft).0, StatusCode::BAD_REQUEST);
        assert_eq!(
            campaign_error(CampaignError::Invalid("bad".to_string())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            campaign_error(CampaignError::NoPendingContacts).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            campaign_error(CampaignError::Database(sqlx::Error::PoolClosed)).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn error_bodies_carry_both_fields() {
        let (status, Json(body)) =
            error_response(StatusCode::BAD_REQUEST, "invalid_request", "nope");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "invalid_request");
        assert_eq!(body.message, "nope");
    }
}
