//! Disparo API - operator REST surface and webhook ingress
//!
//! This crate provides the HTTP layer of the platform: tenant-scoped
//! campaign, instance and contact management behind API key auth, plus
//! the gateway webhook endpoint feeding the status reconciler.

pub mod auth;
pub mod handlers;
pub mod routes;

pub use auth::AppState;
pub use routes::create_router;
