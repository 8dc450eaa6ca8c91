//! Status reconciler - applies gateway webhook events to campaign rows
//!
//! Receipts arrive out of band and out of order: a read receipt can
//! beat its delivery receipt, the gateway replays events, and some
//! events belong to conversations the platform never sent. Every
//! transition is a conditional UPDATE, so replays and stale events fall
//! through as no-ops and campaign counters only move when a row
//! actually changed.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use disparo_storage::models::{CreateCampaignLog, Instance, LogSeverity};
use disparo_storage::repository::{
    CampaignContactRepository, CampaignLogRepository, CampaignRepository, InstanceRepository,
};
use disparo_storage::DatabasePool;

use super::inbox::InboxSink;

/// Gateway webhook envelope. `data` stays untyped because upsert
/// payloads carry free-form message content the engine never inspects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub instance: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl WebhookEvent {
    /// Gateway message id at `data.key.id`
    fn external_id(&self) -> Option<&str> {
        self.data.get("key")?.get("id")?.as_str()
    }

    /// Delivery status at `data.update.status`
    fn status(&self) -> Option<&str> {
        self.data.get("update")?.get("status")?.as_str()
    }
}

/// Applies webhook events to campaign state
pub struct StatusReconciler {
    campaigns: CampaignRepository,
    campaign_contacts: CampaignContactRepository,
    campaign_logs: CampaignLogRepository,
    instances: InstanceRepository,
    inbox: Arc<dyn InboxSink>,
}

impl StatusReconciler {
    /// Create a new status reconciler
    pub fn new(db_pool: &DatabasePool, inbox: Arc<dyn InboxSink>) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            campaigns: CampaignRepository::new(pool.clone()),
            campaign_contacts: CampaignContactRepository::new(pool.clone()),
            campaign_logs: CampaignLogRepository::new(pool.clone()),
            instances: InstanceRepository::new(pool),
            inbox,
        }
    }

    /// Process one webhook event. The ingress route ACKs regardless of
    /// the outcome here; an error means storage trouble and the event
    /// is lost, which replayed receipts and the stuck-send sweep
    /// absorb.
    pub async fn process(&self, event: WebhookEvent) -> Result<()> {
        let instance = match self.instances.get_by_gateway_name(&event.instance).await? {
            Some(i) => i,
            None => {
                debug!("Webhook for unknown instance {:?} dropped", event.instance);
                return Ok(());
            }
        };

        if event.event == "messages.upsert" {
            return self
                .forward_to_inbox(&instance, &event, "Incoming reply")
                .await;
        }

        let external_id = match event.external_id() {
            Some(id) => id.to_string(),
            None => {
                debug!(
                    "Webhook without a message id dropped (event: {})",
                    event.event
                );
                return Ok(());
            }
        };

        // send.failed events carry no update.status
        let status = if event.event == "send.failed" {
            "FAILED".to_string()
        } else {
            match event.status() {
                Some(s) => s.to_string(),
                None => {
                    debug!("Webhook without a status dropped (event: {})", event.event);
                    return Ok(());
                }
            }
        };

        let contact = match self
            .campaign_contacts
            .find_by_external_id(instance.tenant_id, &instance.gateway_name, &external_id)
            .await?
        {
            Some(c) => c,
            None => {
                return self
                    .forward_to_inbox(&instance, &event, "Non-campaign message update")
                    .await;
            }
        };

        match status.as_str() {
            "SENT" => {
                debug!("Send confirmation for message {}", external_id);
            }
            "DELIVERY_ACK" => {
                if self.campaign_contacts.mark_delivered(contact.id).await? {
                    self.campaigns
                        .record_message_delivered(contact.campaign_id)
                        .await?;
                    debug!("Message {} delivered", external_id);
                } else {
                    debug!("Stale delivery receipt for message {} ignored", external_id);
                }
            }
            "READ" => {
                if self.campaign_contacts.mark_read(contact.id).await? {
                    self.campaigns
                        .record_message_read(contact.campaign_id)
                        .await?;
                    debug!("Message {} read", external_id);
                } else {
                    debug!("Stale read receipt for message {} ignored", external_id);
                }
            }
            "FAILED" | "failed" => {
                // messages_sent stays as it was; the send did happen
                if self
                    .campaign_contacts
                    .mark_failed_after_send(contact.id, "gateway reported delivery failure")
                    .await?
                {
                    self.campaigns
                        .record_message_failed(contact.campaign_id)
                        .await?;
                    warn!(
                        "Message {} failed after the gateway accepted it (campaign {})",
                        external_id, contact.campaign_id
                    );
                    self.log_failure(&contact.tenant_id, &contact.campaign_id, &external_id)
                        .await;
                } else {
                    debug!("Stale failure report for message {} ignored", external_id);
                }
            }
            other => {
                debug!(
                    "Unhandled gateway status {:?} for message {} ignored",
                    other, external_id
                );
            }
        }

        Ok(())
    }

    async fn forward_to_inbox(
        &self,
        instance: &Instance,
        event: &WebhookEvent,
        what: &str,
    ) -> Result<()> {
        info!(
            "{} on instance {} forwarded to inbox (event: {})",
            what, instance.name, event.event
        );
        let raw = serde_json::to_value(event)?;
        self.inbox.forward_event(instance.tenant_id, &raw).await
    }

    async fn log_failure(
        &self,
        tenant_id: &disparo_common::types::TenantId,
        campaign_id: &disparo_common::types::CampaignId,
        external_id: &str,
    ) {
        let entry = CreateCampaignLog {
            tenant_id: *tenant_id,
            campaign_id: *campaign_id,
            severity: LogSeverity::Warning,
            event_type: "message_failed".to_string(),
            message: format!("Gateway reported delivery failure for message {}", external_id),
            details: Some(json!({ "external_msg_id": external_id })),
        };
        if let Err(e) = self.campaign_logs.create(entry).await {
            warn!("Failed to write campaign log: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_the_delivery_receipt_shape() {
        let event: WebhookEvent = serde_json::from_value(json!({
            "event": "messages.update",
            "instance": "acme-sales01",
            "data": {
                "key": { "id": "3EB0538DA65B" },
                "update": { "status": "DELIVERY_ACK" }
            }
        }))
        .unwrap();

        assert_eq!(event.event, "messages.update");
        assert_eq!(event.instance, "acme-sales01");
        assert_eq!(event.external_id(), Some("3EB0538DA65B"));
        assert_eq!(event.status(), Some("DELIVERY_ACK"));
    }

    #[test]
    fn tolerates_missing_fields() {
        let event: WebhookEvent = serde_json::from_value(json!({})).unwrap();
        assert_eq!(event.event, "");
        assert_eq!(event.instance, "");
        assert_eq!(event.external_id(), None);
        assert_eq!(event.status(), None);
    }

    #[test]
    fn connection_events_have_no_message_id() {
        let event: WebhookEvent = serde_json::from_value(json!({
            "event": "connection.update",
            "instance": "acme-sales01",
            "data": { "state": "close" }
        }))
        .unwrap();

        assert_eq!(event.external_id(), None);
        assert_eq!(event.status(), None);
    }

    #[test]
    fn upsert_payload_keeps_its_message_content() {
        let event: WebhookEvent = serde_json::from_value(json!({
            "event": "messages.upsert",
            "instance": "acme-sales01",
            "data": {
                "key": { "id": "ABC123", "fromMe": false },
                "message": { "conversation": "stop" }
            }
        }))
        .unwrap();

        assert_eq!(event.external_id(), Some("ABC123"));

        // Forwarding re-serializes the whole envelope untouched
        let raw = serde_json::to_value(&event).unwrap();
        assert_eq!(raw["data"]["message"]["conversation"], "stop");
    }
}
