//! Disparo Engine - campaign dispatch, send workers, and reconciliation
//!
//! This crate provides the sending machinery behind the platform:
//! per-campaign dispatch loops, the queue worker pool, gateway HTTP
//! integration, and webhook-driven delivery status reconciliation.

pub mod campaign;
pub mod gateway;
pub mod queue;
pub mod webhook;

pub use campaign::{CampaignError, CampaignManager, EngineSupervisor, TemplateRenderer};
pub use gateway::{GatewayClient, SendOutcome, StatePoller};
pub use queue::{SendJobPayload, SendWorker};
pub use webhook::{InboxSink, LoggingInboxSink, StatusReconciler, WebhookEvent};
