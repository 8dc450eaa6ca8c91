//! API routes

use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::{auth_middleware, AppState};
use crate::handlers::{campaigns, contacts, health, instances, variants, webhooks};

/// Create the API router. An empty origin list allows any origin.
pub fn create_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    // CORS configuration
    let cors = if cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // Health check routes (no auth required)
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .with_state(state.clone());

    // Campaign routes, including variants and lifecycle actions
    let campaign_routes = Router::new()
        .route(
            "/",
            get(campaigns::list_campaigns).post(campaigns::create_campaign),
        )
        .route(
            "/:campaign_id",
            get(campaigns::get_campaign)
                .put(campaigns::update_campaign)
                .delete(campaigns::delete_campaign),
        )
        .route("/:campaign_id/start", post(campaigns::start_campaign))
        .route("/:campaign_id/pause", post(campaigns::pause_campaign))
        .route("/:campaign_id/resume", post(campaigns::resume_campaign))
        .route("/:campaign_id/cancel", post(campaigns::cancel_campaign))
        .route("/:campaign_id/stats", get(campaigns::get_campaign_stats))
        .route("/:campaign_id/logs", get(campaigns::get_campaign_logs))
        .route("/:campaign_id/contacts", post(campaigns::attach_contacts))
        .route(
            "/:campaign_id/variants",
            get(variants::list_variants).post(variants::create_variant),
        )
        .route(
            "/:campaign_id/variants/:variant_id",
            put(variants::update_variant).delete(variants::delete_variant),
        );

    // Gateway instance routes
    let instance_routes = Router::new()
        .route(
            "/",
            get(instances::list_instances).post(instances::create_instance),
        )
        .route(
            "/:instance_id",
            get(instances::get_instance)
                .put(instances::update_instance)
                .delete(instances::delete_instance),
        )
        .route("/:instance_id/refresh", post(instances::refresh_instance));

    // Contact routes
    let contact_routes = Router::new().route(
        "/",
        get(contacts::list_contacts).post(contacts::create_contacts),
    );

    // Webhook ingress, authenticated by shared secret instead of API key
    let webhook_routes = Router::new().route("/gateway", post(webhooks::gateway_webhook));

    // The auth layer wraps only the routes nested before it, so the
    // webhook routes stay outside API-key auth.
    let api_v1 = Router::new()
        .nest("/tenants/:tenant_id/campaigns", campaign_routes)
        .nest("/tenants/:tenant_id/instances", instance_routes)
        .nest("/tenants/:tenant_id/contacts", contact_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .nest("/webhooks", webhook_routes)
        .with_state(state.clone());

    // Combine all routes
    Router::new()
        .nest("/health", health_routes)
        .nest("/api/v1", api_v1)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
