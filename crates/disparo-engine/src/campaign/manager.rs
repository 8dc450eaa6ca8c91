//! Campaign lifecycle operations
//!
//! The manager sits between the HTTP handlers and the repositories. It
//! validates inputs, enforces the campaign state machine, writes the
//! per-campaign audit log, and hands freshly started or resumed
//! campaigns to the supervisor for dispatch.

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tracing::info;

use disparo_common::types::{CampaignId, ContactId, TenantId, VariantId};
use disparo_storage::models::{
    Campaign, CampaignLog, CampaignStats, CampaignStatus, CreateCampaign, CreateCampaignLog,
    CreateVariant, LogSeverity, MessageVariant, UpdateCampaign, UpdateVariant,
};
use disparo_storage::repository::{
    CampaignContactRepository, CampaignLogRepository, CampaignRepository, InstanceRepository,
    VariantRepository,
};
use disparo_storage::DatabasePool;

use super::rotation::{self, NoInstanceReason};
use super::schedule;
use super::supervisor::EngineSupervisor;

/// Most variants a campaign may hold
const MAX_VARIANTS: usize = 5;

/// Campaign operation errors
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("Campaign not found")]
    NotFound,

    #[error("Only draft campaigns can be modified")]
    NotDraft,

    #[error("Campaign is not running")]
    NotRunning,

    #[error("Campaign is not paused")]
    NotPaused,

    #[error("Campaign has already finished")]
    Finished,

    #[error("Only draft campaigns can be started")]
    NotStartable,

    #[error("Campaign has no active message variants")]
    NoActiveVariants,

    #[error("No instance can send right now: {0}")]
    NoEligibleInstance(NoInstanceReason),

    #[error("Campaign has no pending contacts")]
    NoPendingContacts,

    #[error("{0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Campaign lifecycle manager
pub struct CampaignManager {
    campaigns: CampaignRepository,
    campaign_contacts: CampaignContactRepository,
    campaign_logs: CampaignLogRepository,
    variants: VariantRepository,
    instances: InstanceRepository,
    supervisor: Arc<EngineSupervisor>,
}

impl CampaignManager {
    /// Create a new campaign manager
    pub fn new(db_pool: &DatabasePool, supervisor: Arc<EngineSupervisor>) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            campaigns: CampaignRepository::new(pool.clone()),
            campaign_contacts: CampaignContactRepository::new(pool.clone()),
            campaign_logs: CampaignLogRepository::new(pool.clone()),
            variants: VariantRepository::new(pool.clone()),
            instances: InstanceRepository::new(pool),
            supervisor,
        }
    }

    /// Create a draft campaign
    pub async fn create_campaign(&self, input: CreateCampaign) -> Result<Campaign, CampaignError> {
        validate_intervals(input.interval_min_s, input.interval_max_s)?;
        validate_limits(input.daily_limit_per_instance, input.pause_on_health_below)?;
        schedule::validate(&input.schedule).map_err(CampaignError::Invalid)?;

        let campaign = self.campaigns.create(input).await?;
        info!("Created campaign: {} ({})", campaign.name, campaign.id);
        Ok(campaign)
    }

    /// Get a campaign
    pub async fn get_campaign(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        self.campaigns
            .get_by_tenant(tenant_id, id)
            .await?
            .ok_or(CampaignError::NotFound)
    }

    /// List campaigns for a tenant, optionally filtered by status
    pub async fn list_campaigns(
        &self,
        tenant_id: TenantId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>, CampaignError> {
        Ok(self
            .campaigns
            .list_by_tenant(tenant_id, status, limit, offset)
            .await?)
    }

    /// Update a draft campaign
    pub async fn update_campaign(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
        input: UpdateCampaign,
    ) -> Result<Campaign, CampaignError> {
        let current = self.get_campaign(tenant_id, id).await?;
        if current.status != "draft" {
            return Err(CampaignError::NotDraft);
        }

        // Partial updates still have to leave a consistent pair behind
        let min_s = input.interval_min_s.unwrap_or(current.interval_min_s);
        let max_s = input.interval_max_s.unwrap_or(current.interval_max_s);
        validate_intervals(min_s, max_s)?;
        validate_limits(input.daily_limit_per_instance, input.pause_on_health_below)?;
        if let Some(spec) = &input.schedule {
            schedule::validate(spec).map_err(CampaignError::Invalid)?;
        }

        self.campaigns
            .update(id, tenant_id, input)
            .await?
            .ok_or(CampaignError::NotFound)
    }

    /// Delete a draft campaign
    pub async fn delete_campaign(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<(), CampaignError> {
        let campaign = self.get_campaign(tenant_id, id).await?;
        if campaign.status != "draft" {
            return Err(CampaignError::NotDraft);
        }

        if !self.campaigns.delete(id, tenant_id).await? {
            return Err(CampaignError::NotFound);
        }
        info!("Deleted campaign {}", id);
        Ok(())
    }

    /// Start a draft campaign. Everything the dispatcher will need has
    /// to be in place before the status flips: at least one active
    /// variant, at least one instance able to send, and at least one
    /// pending contact.
    pub async fn start_campaign(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self.get_campaign(tenant_id, id).await?;
        if campaign.status != "draft" {
            return Err(CampaignError::NotStartable);
        }

        validate_intervals(campaign.interval_min_s, campaign.interval_max_s)?;
        schedule::validate(campaign.schedule_spec()).map_err(CampaignError::Invalid)?;

        if self.variants.count_active(id).await? == 0 {
            return Err(CampaignError::NoActiveVariants);
        }

        let eligible = self
            .instances
            .list_eligible(
                tenant_id,
                campaign.pause_on_health_below,
                campaign.daily_limit_per_instance,
            )
            .await?;
        if eligible.is_empty() {
            let fleet = self
                .instances
                .fleet_counts(tenant_id, campaign.pause_on_health_below)
                .await?;
            return Err(CampaignError::NoEligibleInstance(rotation::unavailable_reason(
                &fleet,
            )));
        }

        if self.campaign_contacts.count_pending(tenant_id, id).await? == 0 {
            return Err(CampaignError::NoPendingContacts);
        }

        self.campaigns.recount_total_contacts(id).await?;
        let started = self
            .campaigns
            .start(id)
            .await?
            .ok_or(CampaignError::NotStartable)?;

        info!("Campaign {} started", id);
        self.log(
            tenant_id,
            id,
            LogSeverity::Info,
            "campaign_started",
            "Campaign started".to_string(),
            None,
        )
        .await;

        self.supervisor.launch(&started).await?;
        Ok(started)
    }

    /// Pause a running campaign. Pausing an already paused campaign is
    /// a no-op.
    pub async fn pause_campaign(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
        reason: Option<String>,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self.get_campaign(tenant_id, id).await?;
        match campaign.status.as_str() {
            "paused" => Ok(campaign),
            "running" => {
                let paused = self
                    .campaigns
                    .pause(id, reason.as_deref())
                    .await?
                    .ok_or(CampaignError::NotRunning)?;

                info!("Campaign {} paused", id);
                let message = match &reason {
                    Some(r) => format!("Campaign paused by operator: {}", r),
                    None => "Campaign paused by operator".to_string(),
                };
                let details = reason.map(|r| json!({ "reason": r }));
                self.log(tenant_id, id, LogSeverity::Info, "campaign_paused", message, details)
                    .await;
                Ok(paused)
            }
            _ => Err(CampaignError::NotRunning),
        }
    }

    /// Resume a paused campaign. Resuming a running campaign is a
    /// no-op.
    pub async fn resume_campaign(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self.get_campaign(tenant_id, id).await?;
        match campaign.status.as_str() {
            "running" => Ok(campaign),
            "paused" => {
                let resumed = self
                    .campaigns
                    .resume(id)
                    .await?
                    .ok_or(CampaignError::NotPaused)?;

                info!("Campaign {} resumed", id);
                self.log(
                    tenant_id,
                    id,
                    LogSeverity::Info,
                    "campaign_resumed",
                    "Campaign resumed".to_string(),
                    None,
                )
                .await;

                self.supervisor.launch(&resumed).await?;
                Ok(resumed)
            }
            _ => Err(CampaignError::NotPaused),
        }
    }

    /// Cancel a campaign from any non-terminal state. Cancelling twice
    /// is a no-op; cancelling a completed campaign is an error.
    pub async fn cancel_campaign(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self.get_campaign(tenant_id, id).await?;
        match campaign.status.as_str() {
            "cancelled" => Ok(campaign),
            "completed" => Err(CampaignError::Finished),
            _ => {
                let cancelled = self
                    .campaigns
                    .cancel(id)
                    .await?
                    .ok_or(CampaignError::Finished)?;

                info!("Campaign {} cancelled", id);
                self.log(
                    tenant_id,
                    id,
                    LogSeverity::Info,
                    "campaign_cancelled",
                    "Campaign cancelled by operator".to_string(),
                    None,
                )
                .await;
                Ok(cancelled)
            }
        }
    }

    /// Progress statistics for a campaign
    pub async fn get_stats(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<CampaignStats, CampaignError> {
        let campaign = self.get_campaign(tenant_id, id).await?;
        let counts = self.campaign_contacts.status_counts(tenant_id, id).await?;
        let progress_percentage = campaign.progress_percentage();

        Ok(CampaignStats {
            campaign_id: campaign.id,
            status: campaign.status,
            is_paused: campaign.is_paused,
            auto_pause_reason: campaign.auto_pause_reason,
            total_contacts: campaign.total_contacts,
            messages_sent: campaign.messages_sent,
            messages_delivered: campaign.messages_delivered,
            messages_read: campaign.messages_read,
            messages_failed: campaign.messages_failed,
            pending_contacts: counts.pending,
            sending_contacts: counts.sending,
            sent_contacts: counts.sent,
            delivered_contacts: counts.delivered,
            read_contacts: counts.read,
            failed_contacts: counts.failed,
            skipped_contacts: counts.skipped,
            progress_percentage,
            next_scheduled_send_at: campaign.next_scheduled_send_at,
            last_send_at: campaign.last_send_at,
        })
    }

    /// Most recent audit log entries for a campaign, newest first
    pub async fn get_logs(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
        limit: i64,
    ) -> Result<Vec<CampaignLog>, CampaignError> {
        self.get_campaign(tenant_id, id).await?;
        Ok(self.campaign_logs.tail(tenant_id, id, limit).await?)
    }

    /// Attach contacts to a campaign. Contacts already attached are
    /// skipped; the return value counts the rows actually added.
    pub async fn attach_contacts(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
        contact_ids: &[ContactId],
    ) -> Result<u64, CampaignError> {
        let campaign = self.get_campaign(tenant_id, id).await?;
        if is_terminal(&campaign) {
            return Err(CampaignError::Finished);
        }

        let attached = self
            .campaign_contacts
            .attach_batch(tenant_id, id, contact_ids)
            .await?;
        self.campaigns.recount_total_contacts(id).await?;

        info!("Attached {} contacts to campaign {}", attached, id);
        self.log(
            tenant_id,
            id,
            LogSeverity::Info,
            "contacts_attached",
            format!("Attached {} contacts", attached),
            Some(json!({ "requested": contact_ids.len(), "attached": attached })),
        )
        .await;
        Ok(attached)
    }

    /// Add a message variant to a campaign
    pub async fn add_variant(
        &self,
        input: CreateVariant,
    ) -> Result<MessageVariant, CampaignError> {
        if !(1..=MAX_VARIANTS as i32).contains(&input.variant_order) {
            return Err(CampaignError::Invalid(format!(
                "variant_order must be between 1 and {}",
                MAX_VARIANTS
            )));
        }
        if input.text.trim().is_empty() {
            return Err(CampaignError::Invalid(
                "variant text must not be empty".to_string(),
            ));
        }

        let campaign = self
            .get_campaign(input.tenant_id, input.campaign_id)
            .await?;
        if is_terminal(&campaign) {
            return Err(CampaignError::Finished);
        }

        let existing = self
            .variants
            .list_by_campaign(input.tenant_id, input.campaign_id)
            .await?;
        if existing.len() >= MAX_VARIANTS {
            return Err(CampaignError::Invalid(format!(
                "a campaign holds at most {} variants",
                MAX_VARIANTS
            )));
        }
        if existing
            .iter()
            .any(|v| v.variant_order == input.variant_order)
        {
            return Err(CampaignError::Invalid(format!(
                "variant_order {} is already in use",
                input.variant_order
            )));
        }

        Ok(self.variants.create(input).await?)
    }

    /// List a campaign's variants in order
    pub async fn list_variants(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
    ) -> Result<Vec<MessageVariant>, CampaignError> {
        self.get_campaign(tenant_id, campaign_id).await?;
        Ok(self
            .variants
            .list_by_campaign(tenant_id, campaign_id)
            .await?)
    }

    /// Update a variant's text or active flag
    pub async fn update_variant(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
        variant_id: VariantId,
        input: UpdateVariant,
    ) -> Result<MessageVariant, CampaignError> {
        if let Some(text) = &input.text {
            if text.trim().is_empty() {
                return Err(CampaignError::Invalid(
                    "variant text must not be empty".to_string(),
                ));
            }
        }

        let variant = self
            .variants
            .get_by_tenant(tenant_id, variant_id)
            .await?
            .ok_or(CampaignError::NotFound)?;
        if variant.campaign_id != campaign_id {
            return Err(CampaignError::NotFound);
        }

        self.variants
            .update(variant_id, tenant_id, input)
            .await?
            .ok_or(CampaignError::NotFound)
    }

    /// Delete a variant
    pub async fn delete_variant(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
        variant_id: VariantId,
    ) -> Result<(), CampaignError> {
        let variant = self
            .variants
            .get_by_tenant(tenant_id, variant_id)
            .await?
            .ok_or(CampaignError::NotFound)?;
        if variant.campaign_id != campaign_id {
            return Err(CampaignError::NotFound);
        }

        if !self.variants.delete(variant_id, tenant_id).await? {
            return Err(CampaignError::NotFound);
        }
        Ok(())
    }

    async fn log(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
        severity: LogSeverity,
        event_type: &str,
        message: String,
        details: Option<serde_json::Value>,
    ) {
        let entry = CreateCampaignLog {
            tenant_id,
            campaign_id,
            severity,
            event_type: event_type.to_string(),
            message,
            details,
        };
        if let Err(e) = self.campaign_logs.create(entry).await {
            tracing::warn!("Failed to write campaign log: {}", e);
        }
    }
}

fn is_terminal(campaign: &Campaign) -> bool {
    campaign
        .status_enum()
        .map(|s| s.is_terminal())
        .unwrap_or(false)
}

fn validate_intervals(min_s: i32, max_s: i32) -> Result<(), CampaignError> {
    if min_s < 0 || max_s < 0 {
        return Err(CampaignError::Invalid(
            "send intervals must not be negative".to_string(),
        ));
    }
    if min_s > max_s {
        return Err(CampaignError::Invalid(
            "interval_min_s must not exceed interval_max_s".to_string(),
        ));
    }
    Ok(())
}

fn validate_limits(
    daily_limit: Option<i32>,
    health_floor: Option<i32>,
) -> Result<(), CampaignError> {
    if let Some(limit) = daily_limit {
        if limit < 0 {
            return Err(CampaignError::Invalid(
                "daily_limit_per_instance must not be negative".to_string(),
            ));
        }
    }
    if let Some(floor) = health_floor {
        if !(0..=100).contains(&floor) {
            return Err(CampaignError::Invalid(
                "pause_on_health_below must be between 0 and 100".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn intervals_accept_equal_bounds_and_zero() {
        assert!(validate_intervals(0, 0).is_ok());
        assert!(validate_intervals(45, 45).is_ok());
        assert!(validate_intervals(20, 90).is_ok());
    }

    #[test]
    fn intervals_reject_negative_and_inverted() {
        assert!(validate_intervals(-1, 10).is_err());
        assert!(validate_intervals(10, -1).is_err());
        assert!(validate_intervals(90, 20).is_err());
    }

    #[test]
    fn limits_reject_out_of_range_values() {
        assert!(validate_limits(None, None).is_ok());
        assert!(validate_limits(Some(0), Some(0)).is_ok());
        assert!(validate_limits(Some(500), Some(100)).is_ok());
        assert!(validate_limits(Some(-1), None).is_err());
        assert!(validate_limits(None, Some(101)).is_err());
        assert!(validate_limits(None, Some(-5)).is_err());
    }

    #[test]
    fn no_instance_error_names_the_reason() {
        let err = CampaignError::NoEligibleInstance(NoInstanceReason::AllDisconnected);
        assert_eq!(
            err.to_string(),
            "No instance can send right now: all instances disconnected"
        );
    }
}
