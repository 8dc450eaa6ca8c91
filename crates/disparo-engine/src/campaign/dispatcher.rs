//! Campaign dispatcher
//!
//! One `CampaignDispatcher` task runs per active campaign, fenced by a
//! cluster-wide lease. Each iteration claims one contact, picks an
//! instance and a variant, renders the message and hands it to the send
//! queue, then sleeps the paced interval. Every durable step is a
//! single atomic statement; the dispatcher never talks to the gateway
//! itself.

use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use disparo_common::config::EngineConfig;
use disparo_common::types::{CampaignId, ScheduleSpec, TenantId};
use disparo_storage::models::{Campaign, CreateCampaignLog, LogSeverity};
use disparo_storage::repository::{
    CampaignContactRepository, CampaignLogRepository, CampaignRepository, ContactRepository,
    InstanceRepository, JobRepository, LeaseRepository, VariantRepository,
};
use disparo_storage::DatabasePool;
use rand::Rng;
use serde_json::json;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::rotation;
use super::schedule::{self, GateDecision};
use super::template::TemplateRenderer;
use crate::queue::{SendJobPayload, SEND_JOB_MAX_ATTEMPTS, SEND_MESSAGE_QUEUE};

/// Longest stretch between liveness checks while sleeping. Pauses and
/// cancellations are observed within this bound.
const WATCH_CHUNK_SECS: i64 = 10;

/// Re-check cadence while every instance sits at its daily cap
const RATE_LIMIT_BACKOFF_SECS: i64 = 300;

/// Lease key fencing a campaign to one dispatcher cluster-wide
pub fn campaign_lease_key(id: CampaignId) -> String {
    format!("campaign-lease:{}", id)
}

/// What the loop should do after an iteration
enum Flow {
    Continue,
    Exit,
}

pub struct CampaignDispatcher {
    campaign_id: CampaignId,
    tenant_id: TenantId,
    campaigns: CampaignRepository,
    campaign_contacts: CampaignContactRepository,
    contacts: ContactRepository,
    variants: VariantRepository,
    instances: InstanceRepository,
    leases: LeaseRepository,
    jobs: JobRepository,
    campaign_logs: CampaignLogRepository,
    renderer: TemplateRenderer,
    /// Lease holder identity; matches the acquisition made before spawn
    holder: Uuid,
    lease_ttl_secs: i64,
}

impl CampaignDispatcher {
    pub fn new(
        db_pool: &DatabasePool,
        campaign: &Campaign,
        holder: Uuid,
        config: &EngineConfig,
    ) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            campaign_id: campaign.id,
            tenant_id: campaign.tenant_id,
            campaigns: CampaignRepository::new(pool.clone()),
            campaign_contacts: CampaignContactRepository::new(pool.clone()),
            contacts: ContactRepository::new(pool.clone()),
            variants: VariantRepository::new(pool.clone()),
            instances: InstanceRepository::new(pool.clone()),
            leases: LeaseRepository::new(pool.clone()),
            jobs: JobRepository::new(pool.clone()),
            campaign_logs: CampaignLogRepository::new(pool),
            renderer: TemplateRenderer::new(),
            holder,
            lease_ttl_secs: config.lock_ttl_secs as i64,
        }
    }

    /// Drive the campaign until it finishes, pauses, loses its lease or
    /// shutdown is requested
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Dispatcher started for campaign {}", self.campaign_id);

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.iterate(&shutdown).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => break,
                Err(e) => {
                    error!(
                        "Dispatcher iteration failed for campaign {}: {}",
                        self.campaign_id, e
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(StdDuration::from_secs(5)) => {}
                    }
                }
            }
        }

        info!("Dispatcher stopped for campaign {}", self.campaign_id);
    }

    async fn iterate(&self, shutdown: &CancellationToken) -> Result<Flow> {
        // Heartbeat doubles as the liveness read; pause and cancel are
        // observed here
        let campaign = match self.campaigns.heartbeat(self.campaign_id).await? {
            Some(campaign) if campaign.is_dispatchable() => campaign,
            Some(_) => {
                debug!(
                    "Campaign {} is paused or stopped, dispatcher exiting",
                    self.campaign_id
                );
                self.release_lease().await;
                return Ok(Flow::Exit);
            }
            None => {
                warn!("Campaign {} row is gone, dispatcher exiting", self.campaign_id);
                self.release_lease().await;
                return Ok(Flow::Exit);
            }
        };

        if !self.hold_lease().await? {
            self.report_lease_lost().await;
            return Ok(Flow::Exit);
        }

        let spec = campaign.schedule_spec();
        match schedule::evaluate(spec, Utc::now()) {
            GateDecision::Open => {}
            GateDecision::Closed {
                next_open_at: Some(next_open),
            } => {
                debug!(
                    "Campaign {} outside its schedule until {}",
                    self.campaign_id, next_open
                );
                self.campaigns
                    .set_next_scheduled_send(self.campaign_id, Some(next_open))
                    .await?;
                return self.wait_until(next_open, shutdown).await;
            }
            GateDecision::Closed { next_open_at: None } => {
                warn!(
                    "Campaign {} has no schedule window within the horizon, pausing",
                    self.campaign_id
                );
                self.auto_pause(
                    "schedule-exhausted",
                    "No schedule window opens within the next 14 days",
                )
                .await?;
                self.release_lease().await;
                return Ok(Flow::Exit);
            }
        }

        let Some(claimed) = self
            .campaign_contacts
            .claim_next_pending(self.tenant_id, self.campaign_id)
            .await?
        else {
            info!("Campaign {} completed: no pending contacts left", self.campaign_id);
            self.campaigns.complete(self.campaign_id).await?;
            self.log(
                LogSeverity::Info,
                "campaign_completed",
                "Campaign completed: all contacts processed".to_string(),
                None,
            )
            .await;
            self.release_lease().await;
            return Ok(Flow::Exit);
        };

        let eligible = self
            .instances
            .list_eligible(
                self.tenant_id,
                campaign.pause_on_health_below,
                campaign.daily_limit_per_instance,
            )
            .await?;

        let Some(selection) = rotation::select(&campaign, &eligible) else {
            // Put the contact back before deciding what the empty
            // fleet means
            self.campaign_contacts.revert_to_pending(claimed.id).await?;

            let fleet = self
                .instances
                .fleet_counts(self.tenant_id, campaign.pause_on_health_below)
                .await?;
            let reason = rotation::unavailable_reason(&fleet);

            return match reason.pause_reason() {
                None => {
                    // Every usable instance is at its daily cap; caps
                    // reset at local midnight
                    let resume_at = next_cap_reset(spec, Utc::now());
                    info!(
                        "Campaign {} rate limited on all instances, waiting until {}",
                        self.campaign_id, resume_at
                    );
                    self.log(
                        LogSeverity::Warning,
                        "all_instances_rate_limited",
                        format!("All instances at their daily cap; resuming around {}", resume_at),
                        None,
                    )
                    .await;
                    self.wait_until(resume_at, shutdown).await
                }
                Some(pause_reason) => {
                    warn!(
                        "Campaign {} has no usable instance ({}), pausing",
                        self.campaign_id, reason
                    );
                    self.auto_pause(pause_reason, &format!("No usable instance: {}", reason))
                        .await?;
                    self.release_lease().await;
                    Ok(Flow::Exit)
                }
            };
        };

        if let Some(cursor) = selection.next_cursor {
            self.campaigns
                .set_rotation_cursor(self.campaign_id, cursor)
                .await?;
        }
        let instance = selection.instance;

        let variants = self.variants.list_active(self.campaign_id).await?;
        // list_active orders by variant_order, so ties go to the
        // earliest variant
        let Some(variant) = variants.iter().min_by_key(|v| v.times_sent) else {
            self.campaign_contacts.revert_to_pending(claimed.id).await?;
            warn!("Campaign {} has no active variants, pausing", self.campaign_id);
            self.auto_pause("no-active-variants", "Campaign has no active message variants")
                .await?;
            self.release_lease().await;
            return Ok(Flow::Exit);
        };

        let Some(contact) = self.contacts.get(claimed.contact_id).await? else {
            // Contact deleted after being attached; fail this entry and
            // move on without pacing
            warn!(
                "Contact {} missing for campaign {}, marking failed",
                claimed.contact_id, self.campaign_id
            );
            self.campaign_contacts
                .mark_failed(claimed.id, "contact record missing")
                .await?;
            self.campaigns.record_message_failed(self.campaign_id).await?;
            return Ok(Flow::Continue);
        };

        let local_hour = schedule::local_hour(&spec.timezone, Utc::now());
        let text = self.renderer.render(&variant.text, &contact, local_hour);

        let payload =
            SendJobPayload::new(&campaign, &claimed, instance, variant, &contact.phone, text);
        self.jobs
            .enqueue(
                self.tenant_id,
                SEND_MESSAGE_QUEUE,
                serde_json::to_value(&payload)?,
                0,
                SEND_JOB_MAX_ATTEMPTS,
            )
            .await?;

        debug!(
            "Enqueued send to {} via {} for campaign {}",
            contact.phone, instance.gateway_name, self.campaign_id
        );

        let pace = pace_interval(campaign.interval_min_s, campaign.interval_max_s);
        let resume_at = Utc::now() + Duration::seconds(pace);
        self.campaigns
            .set_next_scheduled_send(self.campaign_id, Some(resume_at))
            .await?;
        self.wait_until(resume_at, shutdown).await
    }

    /// Sleep until `until` in short chunks, keeping the heartbeat and
    /// lease fresh and watching for pause and shutdown along the way
    async fn wait_until(&self, until: DateTime<Utc>, shutdown: &CancellationToken) -> Result<Flow> {
        loop {
            let now = Utc::now();
            if now >= until {
                return Ok(Flow::Continue);
            }
            let chunk = (until - now).num_seconds().clamp(1, WATCH_CHUNK_SECS);

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(Flow::Exit),
                _ = sleep(StdDuration::from_secs(chunk as u64)) => {}
            }

            match self.campaigns.heartbeat(self.campaign_id).await? {
                Some(campaign) if campaign.is_dispatchable() => {}
                _ => {
                    debug!(
                        "Campaign {} stopped while waiting, dispatcher exiting",
                        self.campaign_id
                    );
                    self.release_lease().await;
                    return Ok(Flow::Exit);
                }
            }

            if !self.hold_lease().await? {
                self.report_lease_lost().await;
                return Ok(Flow::Exit);
            }
        }
    }

    /// Renew the lease, re-acquiring it if it lapsed unclaimed. False
    /// means another holder owns the campaign now.
    async fn hold_lease(&self) -> Result<bool> {
        let key = campaign_lease_key(self.campaign_id);
        if self.leases.renew(&key, self.holder, self.lease_ttl_secs).await? {
            return Ok(true);
        }
        Ok(self.leases.acquire(&key, self.holder, self.lease_ttl_secs).await?)
    }

    async fn release_lease(&self) {
        let key = campaign_lease_key(self.campaign_id);
        if let Err(e) = self.leases.release(&key, self.holder).await {
            warn!("Failed to release lease for campaign {}: {}", self.campaign_id, e);
        }
    }

    async fn report_lease_lost(&self) {
        error!(
            "Campaign {} lease is held by another dispatcher, exiting",
            self.campaign_id
        );
        self.log(
            LogSeverity::Critical,
            "lease_lost",
            "Campaign lease is held by another dispatcher".to_string(),
            None,
        )
        .await;
    }

    /// Pause the campaign from inside the engine, leaving the reason on
    /// the row and in the log
    async fn auto_pause(&self, reason: &str, message: &str) -> Result<()> {
        self.campaigns.pause(self.campaign_id, Some(reason)).await?;
        self.log(
            LogSeverity::Warning,
            "campaign_auto_paused",
            message.to_string(),
            Some(json!({ "reason": reason })),
        )
        .await;
        Ok(())
    }

    async fn log(
        &self,
        severity: LogSeverity,
        event_type: &str,
        message: String,
        details: Option<serde_json::Value>,
    ) {
        let entry = CreateCampaignLog {
            tenant_id: self.tenant_id,
            campaign_id: self.campaign_id,
            severity,
            event_type: event_type.to_string(),
            message,
            details,
        };
        if let Err(e) = self.campaign_logs.create(entry).await {
            warn!("Failed to write campaign log: {}", e);
        }
    }
}

/// Humanized gap between two sends
fn pace_interval(min_s: i32, max_s: i32) -> i64 {
    let (lo, hi) = if min_s <= max_s { (min_s, max_s) } else { (max_s, min_s) };
    rand::thread_rng().gen_range(lo..=hi) as i64
}

/// When to look again after every instance hit its daily cap. Caps
/// reset at local midnight, but instances can also recover sooner.
fn next_cap_reset(spec: &ScheduleSpec, now: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = schedule::next_local_midnight(&spec.timezone, now);
    let backoff = now + Duration::seconds(RATE_LIMIT_BACKOFF_SECS);
    midnight.min(backoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lease_key_format() {
        let id = Uuid::parse_str("0191e3a0-1111-7000-8000-000000000001").unwrap();
        assert_eq!(
            campaign_lease_key(id),
            "campaign-lease:0191e3a0-1111-7000-8000-000000000001"
        );
    }

    #[test]
    fn test_pace_interval_stays_in_bounds() {
        for _ in 0..100 {
            let pace = pace_interval(45, 90);
            assert!((45..=90).contains(&pace), "pace {} out of range", pace);
        }
    }

    #[test]
    fn test_pace_interval_tolerates_swapped_bounds() {
        for _ in 0..20 {
            let pace = pace_interval(90, 45);
            assert!((45..=90).contains(&pace));
        }
        assert_eq!(pace_interval(60, 60), 60);
    }

    #[test]
    fn test_cap_reset_prefers_the_sooner_instant() {
        let spec = ScheduleSpec::always_open("America/Sao_Paulo");

        // Mid-day: the five minute backoff comes first
        let noon = chrono_tz::America::Sao_Paulo
            .with_ymd_and_hms(2026, 3, 2, 12, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(next_cap_reset(&spec, noon), noon + Duration::seconds(300));

        // Just before midnight: the daily reset comes first
        let late = chrono_tz::America::Sao_Paulo
            .with_ymd_and_hms(2026, 3, 2, 23, 58, 0)
            .unwrap()
            .with_timezone(&Utc);
        let reset = next_cap_reset(&spec, late);
        assert!(reset < late + Duration::seconds(300));
        assert_eq!(
            reset.with_timezone(&chrono_tz::America::Sao_Paulo).hour(),
            0
        );
    }
}
