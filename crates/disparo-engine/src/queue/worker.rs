//! Send queue worker
//!
//! Pulls `send_message` jobs off the queue and carries them through the
//! gateway. Each job holds a fully rendered message; the worker's job is
//! ordering (phone locks), last-moment re-validation, the HTTP call and
//! the bookkeeping that follows from its outcome.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use disparo_common::config::EngineConfig;
use disparo_common::types::{CampaignContactId, CampaignId, InstanceId, TenantId, VariantId};
use disparo_storage::models::{
    Campaign, CampaignContact, CreateCampaignLog, Instance, Job, LogSeverity, MessageVariant,
};
use disparo_storage::repository::{
    CampaignContactRepository, CampaignLogRepository, CampaignRepository, InstanceRepository,
    JobRepository, PhoneLockRepository, VariantRepository,
};
use disparo_storage::DatabasePool;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::gateway::{GatewayClient, SendOutcome};

/// Queue that carries outbound message jobs
pub const SEND_MESSAGE_QUEUE: &str = "send_message";

/// Payload discriminator; anything else on the queue is dead-lettered
pub const SEND_MESSAGE_TYPE: &str = "send_message";

/// Gateway attempts per contact before the send is abandoned
const MAX_SEND_RETRIES: i32 = 3;

/// Queue-level attempts for a single job row. These cover
/// infrastructure errors only; gateway retries ride on fresh rows.
pub const SEND_JOB_MAX_ATTEMPTS: i32 = 3;

const FAILURE_STREAK_WINDOW: Duration = Duration::from_secs(300);
const FAILURE_STREAK_MIN_SAMPLES: usize = 4;

/// Wire payload of a queued send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendJobPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub tenant_id: TenantId,
    pub campaign_id: CampaignId,
    pub campaign_contact_id: CampaignContactId,
    pub instance_id: InstanceId,
    pub variant_id: VariantId,
    pub phone: String,
    pub text: String,
    pub enqueued_at: DateTime<Utc>,
    #[serde(rename = "_retry_count", default)]
    pub retry_count: i32,
}

impl SendJobPayload {
    /// Build a first-attempt payload for a freshly claimed contact
    pub fn new(
        campaign: &Campaign,
        campaign_contact: &CampaignContact,
        instance: &Instance,
        variant: &MessageVariant,
        phone: &str,
        text: String,
    ) -> Self {
        Self {
            kind: SEND_MESSAGE_TYPE.to_string(),
            tenant_id: campaign.tenant_id,
            campaign_id: campaign.id,
            campaign_contact_id: campaign_contact.id,
            instance_id: instance.id,
            variant_id: variant.id,
            phone: phone.to_string(),
            text,
            enqueued_at: Utc::now(),
            retry_count: 0,
        }
    }
}

/// Sliding failure-rate window per instance
///
/// An instance that fails more than half of its sends across the last
/// five minutes takes one aggressive health drop, then its window is
/// cleared so a single bad patch is not punished twice.
struct FailureTracker {
    window: Duration,
    min_samples: usize,
    samples: Mutex<HashMap<InstanceId, VecDeque<(Instant, bool)>>>,
}

impl FailureTracker {
    fn new(window: Duration, min_samples: usize) -> Self {
        Self {
            window,
            min_samples,
            samples: Mutex::new(HashMap::new()),
        }
    }

    /// Record one outcome. Returns true when this outcome tips the
    /// instance over the failure threshold.
    async fn record(&self, instance_id: InstanceId, success: bool) -> bool {
        let now = Instant::now();
        let mut samples = self.samples.lock().await;
        let entries = samples.entry(instance_id).or_default();
        entries.push_back((now, success));
        while let Some((t, _)) = entries.front() {
            if now.duration_since(*t) > self.window {
                entries.pop_front();
            } else {
                break;
            }
        }

        if success || entries.len() < self.min_samples {
            return false;
        }

        let failures = entries.iter().filter(|(_, ok)| !ok).count();
        if failures * 2 > entries.len() {
            entries.clear();
            true
        } else {
            false
        }
    }
}

/// Worker pool for the send queue
#[derive(Clone)]
pub struct SendWorker {
    jobs: JobRepository,
    campaigns: CampaignRepository,
    campaign_contacts: CampaignContactRepository,
    variants: VariantRepository,
    instances: InstanceRepository,
    campaign_logs: CampaignLogRepository,
    phone_locks: PhoneLockRepository,
    gateway: GatewayClient,
    failure_tracker: Arc<FailureTracker>,
    concurrency: usize,
    batch_size: i64,
    poll_interval_secs: u64,
    lock_ttl_secs: i64,
    phone_lock_retry_delay_secs: i64,
}

impl SendWorker {
    pub fn new(db_pool: DatabasePool, gateway: GatewayClient, config: &EngineConfig) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            jobs: JobRepository::new(pool.clone()),
            campaigns: CampaignRepository::new(pool.clone()),
            campaign_contacts: CampaignContactRepository::new(pool.clone()),
            variants: VariantRepository::new(pool.clone()),
            instances: InstanceRepository::new(pool.clone()),
            campaign_logs: CampaignLogRepository::new(pool.clone()),
            phone_locks: PhoneLockRepository::new(pool),
            gateway,
            failure_tracker: Arc::new(FailureTracker::new(
                FAILURE_STREAK_WINDOW,
                FAILURE_STREAK_MIN_SAMPLES,
            )),
            concurrency: config.send_concurrency,
            batch_size: config.send_batch_size as i64,
            poll_interval_secs: config.queue_poll_interval_secs,
            lock_ttl_secs: config.lock_ttl_secs as i64,
            phone_lock_retry_delay_secs: config.phone_lock_retry_delay_secs as i64,
        }
    }

    /// Run the worker loop until shutdown is requested, then drain
    /// in-flight sends before returning
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(Duration::from_secs(self.poll_interval_secs));
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        info!(
            "Send worker started (concurrency: {}, batch size: {}, poll interval: {}s)",
            self.concurrency, self.batch_size, self.poll_interval_secs
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.process_batch(&semaphore).await {
                        error!("Error processing send queue: {}", e);
                    }
                }
            }
        }

        // In-flight gateway calls are never aborted mid-send; wait for
        // every permit to come back
        let _ = semaphore.acquire_many(self.concurrency as u32).await;
        info!("Send worker stopped");
    }

    async fn process_batch(&self, semaphore: &Arc<Semaphore>) -> Result<()> {
        let jobs = self.jobs.claim_batch(SEND_MESSAGE_QUEUE, self.batch_size).await?;
        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Claimed {} send jobs", jobs.len());

        let mut handles = Vec::new();
        for job in jobs {
            let permit = semaphore.clone().acquire_owned().await?;
            let worker = self.clone();
            handles.push(tokio::spawn(async move {
                worker.process_job(job).await;
                drop(permit);
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Send task panicked: {}", e);
            }
        }

        Ok(())
    }

    async fn process_job(&self, job: Job) {
        let payload: SendJobPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Unreadable payload on job {}: {}", job.id, e);
                let reason = format!("unreadable payload: {}", e);
                if let Err(e) = self.jobs.dead_letter(&job, &reason).await {
                    error!("Failed to dead-letter job {}: {}", job.id, e);
                }
                if let Err(e) = self.jobs.mark_failed(job.id, &reason).await {
                    error!("Failed to mark job {} failed: {}", job.id, e);
                }
                return;
            }
        };

        if payload.kind != SEND_MESSAGE_TYPE {
            warn!("Unexpected job type '{}' on send queue", payload.kind);
            let reason = format!("unknown job type: {}", payload.kind);
            if let Err(e) = self.jobs.dead_letter(&job, &reason).await {
                error!("Failed to dead-letter job {}: {}", job.id, e);
            }
            if let Err(e) = self.jobs.mark_failed(job.id, &reason).await {
                error!("Failed to mark job {} failed: {}", job.id, e);
            }
            return;
        }

        match self.execute_send(&payload).await {
            Ok(()) => {
                if let Err(e) = self.jobs.complete(job.id).await {
                    error!("Failed to mark job {} completed: {}", job.id, e);
                }
            }
            Err(e) => {
                // Database trouble while applying an outcome. The job
                // row burns one of its own attempts for that.
                warn!("Send job {} errored: {}", job.id, e);
                let result = if job.attempts >= job.max_attempts {
                    self.jobs.mark_failed(job.id, &e.to_string()).await
                } else {
                    self.jobs.schedule_retry(job.id, &e.to_string(), 30).await
                };
                if let Err(e) = result {
                    error!("Failed to update job {} after error: {}", job.id, e);
                }
            }
        }
    }

    /// Carry one payload through lock, validation, gateway call and
    /// outcome. `Ok` means the job is consumed, whatever the outcome of
    /// the send itself.
    async fn execute_send(&self, payload: &SendJobPayload) -> Result<()> {
        // One holder identity per in-flight send. Concurrent tasks in
        // the same process must contend for a phone like tasks on
        // different hosts do.
        let lock_holder = Uuid::new_v4();
        let locked = self
            .phone_locks
            .acquire(&payload.phone, lock_holder, self.lock_ttl_secs)
            .await?;
        if !locked {
            // Another send to this number is in flight somewhere in the
            // cluster. A fresh job carries the retry; this one is done.
            debug!(
                "Phone {} is locked, retrying in {}s",
                payload.phone, self.phone_lock_retry_delay_secs
            );
            self.requeue(payload, self.phone_lock_retry_delay_secs).await?;
            return Ok(());
        }

        let result = self.locked_send(payload).await;

        match self.phone_locks.release(&payload.phone, lock_holder).await {
            Ok(_) => {}
            Err(e) => warn!("Failed to release phone lock for {}: {}", payload.phone, e),
        }

        result
    }

    async fn locked_send(&self, payload: &SendJobPayload) -> Result<()> {
        // A first-attempt job owns its contact row already; a retry job
        // has to win the row back, and loses it when the dispatcher
        // re-claimed the contact in the meantime.
        if payload.retry_count > 0 {
            if !self
                .campaign_contacts
                .claim_for_retry(payload.campaign_contact_id)
                .await?
            {
                debug!(
                    "Contact {} already re-dispatched, dropping retry",
                    payload.campaign_contact_id
                );
                return Ok(());
            }
        } else {
            match self.campaign_contacts.get(payload.campaign_contact_id).await? {
                Some(row) if row.status == "sending" => {}
                _ => {
                    debug!(
                        "Contact {} no longer claimed for sending, dropping job",
                        payload.campaign_contact_id
                    );
                    return Ok(());
                }
            }
        }

        // Re-validate against fresh rows. The dispatcher's view can be
        // seconds old by the time this job is claimed.
        let campaign = match self.campaigns.get(payload.campaign_id).await? {
            Some(campaign) if campaign.is_dispatchable() => campaign,
            _ => {
                debug!(
                    "Campaign {} is no longer running, reverting contact",
                    payload.campaign_id
                );
                self.campaign_contacts
                    .revert_to_pending(payload.campaign_contact_id)
                    .await?;
                return Ok(());
            }
        };

        let instance = match self.instances.get(payload.instance_id).await? {
            Some(instance) => instance,
            None => {
                warn!("Instance {} is gone, reverting contact", payload.instance_id);
                self.campaign_contacts
                    .revert_to_pending(payload.campaign_contact_id)
                    .await?;
                return Ok(());
            }
        };

        if !instance_still_eligible(&instance, &campaign) {
            debug!(
                "Instance {} no longer eligible, reverting contact",
                instance.gateway_name
            );
            self.campaign_contacts
                .revert_to_pending(payload.campaign_contact_id)
                .await?;
            return Ok(());
        }

        let outcome = self
            .gateway
            .send_text(&instance, &payload.phone, &payload.text)
            .await;
        self.apply_outcome(payload, &instance, outcome).await
    }

    async fn apply_outcome(
        &self,
        payload: &SendJobPayload,
        instance: &Instance,
        outcome: SendOutcome,
    ) -> Result<()> {
        match outcome {
            SendOutcome::Success { external_msg_id } => {
                self.handle_success(payload, instance, &external_msg_id).await
            }
            SendOutcome::Terminal { error, auth_failure } => {
                self.handle_terminal(payload, instance, &error, auth_failure).await
            }
            SendOutcome::Transient { error } => {
                self.handle_transient(payload, instance, &error).await
            }
        }
    }

    async fn handle_success(
        &self,
        payload: &SendJobPayload,
        instance: &Instance,
        external_msg_id: &str,
    ) -> Result<()> {
        // The gateway accepted the message, so instance volume counts
        // regardless of what happened to the row in the meantime
        self.instances.record_send(instance.id, true).await?;
        self.failure_tracker.record(instance.id, true).await;

        let transitioned = self
            .campaign_contacts
            .mark_sent(
                payload.campaign_contact_id,
                payload.variant_id,
                &instance.gateway_name,
                external_msg_id,
            )
            .await?;

        if !transitioned {
            // The row left `sending` while the call was in flight,
            // most likely reclaimed by the stuck-send sweep
            warn!(
                "Contact {} was not in sending after an accepted send",
                payload.campaign_contact_id
            );
            return Ok(());
        }

        self.campaigns.record_message_sent(payload.campaign_id).await?;
        self.variants.record_use(payload.variant_id).await?;

        info!(
            "Message sent to {} via {} (campaign {})",
            payload.phone, instance.gateway_name, payload.campaign_id
        );
        self.log(
            payload,
            LogSeverity::Info,
            "message_sent",
            format!("Message sent to {}", payload.phone),
            Some(json!({
                "instance": instance.gateway_name,
                "variant_id": payload.variant_id,
                "external_msg_id": external_msg_id,
            })),
        )
        .await;

        Ok(())
    }

    async fn handle_terminal(
        &self,
        payload: &SendJobPayload,
        instance: &Instance,
        error: &str,
        auth_failure: bool,
    ) -> Result<()> {
        self.instances.record_send(instance.id, false).await?;
        self.check_failure_streak(instance).await;

        let transitioned = self
            .campaign_contacts
            .mark_failed(payload.campaign_contact_id, error)
            .await?;
        if transitioned {
            self.campaigns.record_message_failed(payload.campaign_id).await?;
        }

        error!(
            "Send to {} via {} failed: {}",
            payload.phone, instance.gateway_name, error
        );
        self.log(
            payload,
            LogSeverity::Error,
            "message_failed",
            format!("Send to {} failed: {}", payload.phone, error),
            Some(json!({ "instance": instance.gateway_name })),
        )
        .await;

        if auth_failure {
            self.handle_auth_failure(payload, instance).await?;
        }

        Ok(())
    }

    /// Rejected credentials poison every send through this instance.
    /// Zero its health and pull the campaign over to the side.
    async fn handle_auth_failure(
        &self,
        payload: &SendJobPayload,
        instance: &Instance,
    ) -> Result<()> {
        error!(
            "Instance {} rejected by gateway (auth), pausing campaign {}",
            instance.gateway_name, payload.campaign_id
        );
        self.instances.record_auth_failure(instance.id).await?;
        self.instances.set_health_score(instance.id, 0).await?;

        let paused = self
            .campaigns
            .pause(payload.campaign_id, Some("instance-auth-failed"))
            .await?;
        if paused.is_some() {
            self.log(
                payload,
                LogSeverity::Critical,
                "campaign_auto_paused",
                format!(
                    "Campaign paused: gateway rejected credentials of instance {}",
                    instance.gateway_name
                ),
                Some(json!({
                    "reason": "instance-auth-failed",
                    "instance": instance.gateway_name,
                })),
            )
            .await;
        }

        Ok(())
    }

    async fn handle_transient(
        &self,
        payload: &SendJobPayload,
        instance: &Instance,
        error: &str,
    ) -> Result<()> {
        self.instances.record_send(instance.id, false).await?;
        self.check_failure_streak(instance).await;

        let updated = self
            .campaign_contacts
            .record_transient_failure(payload.campaign_contact_id, error, MAX_SEND_RETRIES)
            .await?;

        let Some(contact) = updated else {
            // Row already resolved elsewhere; nothing left to retry
            return Ok(());
        };

        if contact.status == "failed" {
            self.campaigns.record_message_failed(payload.campaign_id).await?;
            error!(
                "Send to {} abandoned after {} attempts: {}",
                payload.phone, contact.retry_count, error
            );
            self.log(
                payload,
                LogSeverity::Error,
                "message_failed",
                format!(
                    "Send to {} abandoned after {} attempts: {}",
                    payload.phone, contact.retry_count, error
                ),
                Some(json!({ "instance": instance.gateway_name })),
            )
            .await;
            return Ok(());
        }

        // The row is pending again with its retry counter bumped; a
        // fresh job carries the next attempt after backoff
        let delay = with_jitter(send_retry_backoff(contact.retry_count));
        warn!(
            "Transient failure sending to {}, retry {} in {}s: {}",
            payload.phone, contact.retry_count, delay, error
        );
        self.log(
            payload,
            LogSeverity::Warning,
            "message_retry",
            format!(
                "Transient failure sending to {}, retry {} in {}s: {}",
                payload.phone, contact.retry_count, delay, error
            ),
            Some(json!({ "instance": instance.gateway_name })),
        )
        .await;

        let mut retry = payload.clone();
        retry.retry_count = contact.retry_count;
        self.requeue(&retry, delay).await?;

        Ok(())
    }

    async fn check_failure_streak(&self, instance: &Instance) {
        if self.failure_tracker.record(instance.id, false).await {
            warn!(
                "Instance {} failed more than half of its recent sends, dropping health",
                instance.gateway_name
            );
            if let Err(e) = self.instances.record_failure_streak(instance.id).await {
                error!(
                    "Failed to record failure streak for instance {}: {}",
                    instance.id, e
                );
            }
        }
    }

    async fn requeue(&self, payload: &SendJobPayload, delay_secs: i64) -> Result<()> {
        self.jobs
            .enqueue(
                payload.tenant_id,
                SEND_MESSAGE_QUEUE,
                serde_json::to_value(payload)?,
                delay_secs,
                SEND_JOB_MAX_ATTEMPTS,
            )
            .await?;
        Ok(())
    }

    async fn log(
        &self,
        payload: &SendJobPayload,
        severity: LogSeverity,
        event_type: &str,
        message: String,
        details: Option<serde_json::Value>,
    ) {
        let entry = CreateCampaignLog {
            tenant_id: payload.tenant_id,
            campaign_id: payload.campaign_id,
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

/// Eligibility check mirroring the dispatcher's instance filter, run
/// again right before the gateway call
fn instance_still_eligible(instance: &Instance, campaign: &Campaign) -> bool {
    instance.is_connected()
        && instance.health_score >= campaign.pause_on_health_below
        && (campaign.daily_limit_per_instance == 0
            || instance.msgs_sent_today < campaign.daily_limit_per_instance)
}

/// Backoff base in seconds for a given retry count (first retry is 1)
fn send_retry_backoff(retry_count: i32) -> i64 {
    match retry_count {
        0 | 1 => 30,
        2 => 60,
        _ => 120,
    }
}

/// Full jitter keeps simultaneous retries from landing on the gateway
/// in lockstep
fn with_jitter(base: i64) -> i64 {
    base + rand::thread_rng().gen_range(0..=base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use disparo_common::types::ScheduleSpec;
    use pretty_assertions::assert_eq;
    use sqlx::types::Json;

    fn test_instance(state: &str, health: i32, sent_today: i32) -> Instance {
        Instance {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Main".to_string(),
            gateway_name: "acme-01".to_string(),
            base_url: "http://gateway.local".to_string(),
            api_key: "key".to_string(),
            connection_state: state.to_string(),
            health_score: health,
            msgs_sent_today: sent_today,
            last_reset_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            timezone: "UTC".to_string(),
            default_department: None,
            last_check_error: None,
            consecutive_check_failures: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_campaign(daily_limit: i32, min_health: i32) -> Campaign {
        Campaign {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Launch".to_string(),
            description: None,
            status: "running".to_string(),
            rotation_mode: "round_robin".to_string(),
            rotation_cursor: 0,
            interval_min_s: 45,
            interval_max_s: 90,
            daily_limit_per_instance: daily_limit,
            pause_on_health_below: min_health,
            schedule: Json(ScheduleSpec::always_open("UTC")),
            total_contacts: 0,
            messages_sent: 0,
            messages_delivered: 0,
            messages_read: 0,
            messages_failed: 0,
            next_scheduled_send_at: None,
            last_send_at: None,
            last_heartbeat_at: None,
            is_paused: false,
            auto_pause_reason: None,
            started_at: Some(Utc::now()),
            completed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_send_retry_backoff_steps() {
        assert_eq!(send_retry_backoff(1), 30);
        assert_eq!(send_retry_backoff(2), 60);
        assert_eq!(send_retry_backoff(3), 120);
        assert_eq!(send_retry_backoff(9), 120);
    }

    #[test]
    fn test_jitter_stays_within_twice_the_base() {
        for _ in 0..100 {
            let delay = with_jitter(30);
            assert!((30..=60).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_payload_wire_shape() {
        let campaign = test_campaign(0, 20);
        let instance = test_instance("open", 100, 0);
        let contact = CampaignContact {
            id: Uuid::new_v4(),
            tenant_id: campaign.tenant_id,
            campaign_id: campaign.id,
            contact_id: Uuid::new_v4(),
            status: "sending".to_string(),
            sent_at: None,
            variant_used: None,
            instance_used: None,
            external_msg_id: None,
            retry_count: 0,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let variant = MessageVariant {
            id: Uuid::new_v4(),
            tenant_id: campaign.tenant_id,
            campaign_id: campaign.id,
            variant_order: 1,
            text: "Oi {{first_name}}".to_string(),
            is_active: true,
            times_sent: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let payload = SendJobPayload::new(
            &campaign,
            &contact,
            &instance,
            &variant,
            "+5511999887766",
            "Oi Ana".to_string(),
        );
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["type"], "send_message");
        assert_eq!(value["_retry_count"], 0);
        assert_eq!(value["phone"], "+5511999887766");
        assert_eq!(value["text"], "Oi Ana");

        let parsed: SendJobPayload = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.campaign_contact_id, contact.id);
        assert_eq!(parsed.retry_count, 0);
    }

    #[test]
    fn test_payload_retry_count_defaults_to_zero() {
        let raw = json!({
            "type": "send_message",
            "tenant_id": Uuid::new_v4(),
            "campaign_id": Uuid::new_v4(),
            "campaign_contact_id": Uuid::new_v4(),
            "instance_id": Uuid::new_v4(),
            "variant_id": Uuid::new_v4(),
            "phone": "+5511999887766",
            "text": "Oi",
            "enqueued_at": Utc::now(),
        });
        let parsed: SendJobPayload = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.retry_count, 0);
    }

    #[test]
    fn test_instance_still_eligible() {
        let campaign = test_campaign(100, 20);

        assert!(instance_still_eligible(&test_instance("open", 80, 50), &campaign));
        assert!(!instance_still_eligible(&test_instance("closed", 80, 50), &campaign));
        assert!(!instance_still_eligible(&test_instance("open", 10, 50), &campaign));
        assert!(!instance_still_eligible(&test_instance("open", 80, 100), &campaign));

        // A zero daily limit means unlimited
        let unlimited = test_campaign(0, 20);
        assert!(instance_still_eligible(&test_instance("open", 80, 5000), &unlimited));
    }

    #[tokio::test]
    async fn test_failure_tracker_trips_on_majority_failures() {
        let tracker = FailureTracker::new(Duration::from_secs(300), 4);
        let instance_id = Uuid::new_v4();

        assert!(!tracker.record(instance_id, true).await);
        assert!(!tracker.record(instance_id, false).await);
        assert!(!tracker.record(instance_id, true).await);
        assert!(!tracker.record(instance_id, false).await);
        // 3 failures out of 5 crosses the half mark
        assert!(tracker.record(instance_id, false).await);

        // Window cleared; one more failure alone does not trip again
        assert!(!tracker.record(instance_id, false).await);
    }

    #[tokio::test]
    async fn test_failure_tracker_needs_minimum_samples() {
        let tracker = FailureTracker::new(Duration::from_secs(300), 4);
        let instance_id = Uuid::new_v4();

        assert!(!tracker.record(instance_id, false).await);
        assert!(!tracker.record(instance_id, false).await);
        assert!(!tracker.record(instance_id, false).await);
    }

    #[tokio::test]
    async fn test_failure_tracker_instances_are_independent() {
        let tracker = FailureTracker::new(Duration::from_secs(300), 4);
        let flaky = Uuid::new_v4();
        let healthy = Uuid::new_v4();

        for _ in 0..4 {
            tracker.record(flaky, false).await;
            assert!(!tracker.record(healthy, true).await);
        }
        assert!(tracker.record(flaky, false).await);
    }
}
