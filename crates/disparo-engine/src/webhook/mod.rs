//! Webhook ingress - delivery status reconciliation and inbox hand-off

mod inbox;
mod reconciler;

pub use inbox::{InboxSink, LoggingInboxSink};
pub use reconciler::{StatusReconciler, WebhookEvent};
