//! Inbox hand-off seam
//!
//! Gateway traffic that does not belong to a campaign, incoming replies
//! above all, is somebody else's problem. The engine only knows how to
//! hand it over.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use disparo_common::types::TenantId;

/// Receives gateway events the engine cannot attribute to campaign
/// traffic. Implementations must not block reconciliation for long;
/// the webhook route waits on this call before ACKing.
#[async_trait]
pub trait InboxSink: Send + Sync {
    async fn forward_event(&self, tenant_id: TenantId, event: &serde_json::Value) -> Result<()>;
}

/// Default sink that records the hand-off and drops the event
pub struct LoggingInboxSink;

#[async_trait]
impl InboxSink for LoggingInboxSink {
    async fn forward_event(&self, tenant_id: TenantId, event: &serde_json::Value) -> Result<()> {
        info!(
            "Inbox event for tenant {} (event: {})",
            tenant_id,
            event.get("event").and_then(|v| v.as_str()).unwrap_or("unknown")
        );
        Ok(())
    }
}
