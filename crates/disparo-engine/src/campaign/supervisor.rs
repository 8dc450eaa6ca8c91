//! Dispatcher supervision and periodic maintenance
//!
//! One supervisor runs per process. It launches one dispatcher task per
//! running campaign, guarded by the campaign lease so a campaign is
//! never dispatched twice, and performs the housekeeping the
//! dispatchers cannot do for themselves: relaunching dispatchers after
//! a crash or restart, re-queueing contacts stranded in `sending`,
//! resetting per-instance daily counters, and purging expired locks
//! and aged-out rows.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use disparo_common::config::EngineConfig;
use disparo_common::types::{CampaignId, TenantId};
use disparo_storage::models::{Campaign, CreateCampaignLog, LogSeverity};
use disparo_storage::repository::{
    CampaignContactRepository, CampaignLogRepository, CampaignRepository, InstanceRepository,
    JobRepository, LeaseRepository, PhoneLockRepository,
};
use disparo_storage::DatabasePool;

use super::dispatcher::{campaign_lease_key, CampaignDispatcher};

/// Completed and dead-lettered jobs older than this are purged
const JOB_RETENTION_DAYS: i32 = 7;
/// Campaign log entries older than this are purged
const LOG_RETENTION_DAYS: i32 = 30;

/// Launches dispatcher tasks and runs the maintenance loop
pub struct EngineSupervisor {
    db_pool: DatabasePool,
    campaigns: CampaignRepository,
    campaign_contacts: CampaignContactRepository,
    campaign_logs: CampaignLogRepository,
    instances: InstanceRepository,
    leases: LeaseRepository,
    phone_locks: PhoneLockRepository,
    jobs: JobRepository,
    config: EngineConfig,
    shutdown: CancellationToken,
    dispatchers: Mutex<Vec<JoinHandle<()>>>,
}

impl EngineSupervisor {
    /// Create a supervisor. Dispatchers spawned later observe clones of
    /// the given shutdown token.
    pub fn new(db_pool: DatabasePool, config: &EngineConfig, shutdown: CancellationToken) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            campaigns: CampaignRepository::new(pool.clone()),
            campaign_contacts: CampaignContactRepository::new(pool.clone()),
            campaign_logs: CampaignLogRepository::new(pool.clone()),
            instances: InstanceRepository::new(pool.clone()),
            leases: LeaseRepository::new(pool.clone()),
            phone_locks: PhoneLockRepository::new(pool.clone()),
            jobs: JobRepository::new(pool),
            db_pool,
            config: config.clone(),
            shutdown,
            dispatchers: Mutex::new(Vec::new()),
        }
    }

    /// Start a dispatcher for a campaign. Returns false when the
    /// campaign lease is already held, meaning a dispatcher is running
    /// somewhere and nothing was spawned.
    pub async fn launch(&self, campaign: &Campaign) -> Result<bool, sqlx::Error> {
        let holder = Uuid::new_v4();
        let key = campaign_lease_key(campaign.id);

        if !self
            .leases
            .acquire(&key, holder, self.config.lock_ttl_secs as i64)
            .await?
        {
            info!(
                "Campaign {} lease already held, not launching a dispatcher",
                campaign.id
            );
            return Ok(false);
        }

        let dispatcher = CampaignDispatcher::new(&self.db_pool, campaign, holder, &self.config);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move { dispatcher.run(shutdown).await });

        self.dispatchers.lock().await.push(handle);
        Ok(true)
    }

    /// Run the maintenance loop until shutdown. The first tick fires
    /// immediately, which doubles as startup recovery: running
    /// campaigns left over from a previous process get fresh
    /// dispatchers as soon as their old leases lapse.
    pub async fn run(&self) {
        let mut ticker = interval(Duration::from_secs(self.config.maintenance_interval_secs));

        info!(
            "Engine supervisor started (maintenance interval: {}s)",
            self.config.maintenance_interval_secs
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.maintenance_tick().await {
                        error!("Maintenance tick failed: {}", e);
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Engine supervisor shutting down");
                    break;
                }
            }
        }

        self.drain().await;
    }

    async fn maintenance_tick(&self) -> anyhow::Result<()> {
        self.resurrect_dispatchers().await?;
        self.requeue_stuck_sends().await?;

        let reset = self.instances.reset_daily_counters().await?;
        if reset > 0 {
            info!("Reset daily send counters on {} instances", reset);
        }

        let leases = self.leases.purge_expired().await?;
        let locks = self.phone_locks.purge_expired().await?;
        if leases > 0 || locks > 0 {
            debug!(
                "Purged {} expired leases and {} expired phone locks",
                leases, locks
            );
        }

        let jobs = self.jobs.purge_completed(JOB_RETENTION_DAYS).await?;
        let logs = self
            .campaign_logs
            .purge_older_than_days(LOG_RETENTION_DAYS)
            .await?;
        if jobs > 0 || logs > 0 {
            debug!("Purged {} old jobs and {} old campaign log entries", jobs, logs);
        }

        self.reap_finished().await;
        Ok(())
    }

    /// Relaunch dispatchers for running campaigns whose lease has
    /// lapsed. Covers process restarts and crashed dispatcher tasks; a
    /// healthy dispatcher renews its lease and is left alone.
    async fn resurrect_dispatchers(&self) -> Result<(), sqlx::Error> {
        for campaign in self.campaigns.list_running().await? {
            if self
                .leases
                .is_live(&campaign_lease_key(campaign.id))
                .await?
            {
                continue;
            }

            if self.launch(&campaign).await? {
                warn!(
                    "Relaunched dispatcher for running campaign {}",
                    campaign.id
                );
                self.log(
                    campaign.tenant_id,
                    campaign.id,
                    LogSeverity::Warning,
                    "recovery",
                    "Dispatcher relaunched after its lease lapsed".to_string(),
                    None,
                )
                .await;
            }
        }
        Ok(())
    }

    /// Revert contacts stranded in `sending` back to `pending` so their
    /// campaigns pick them up again. Strands happen when a worker dies
    /// between claiming a contact and finishing the send.
    async fn requeue_stuck_sends(&self) -> Result<(), sqlx::Error> {
        let threshold = self.config.stuck_sending_threshold_secs as i64;
        let recovered = self
            .campaign_contacts
            .recover_stuck_sending(threshold)
            .await?;
        if recovered.is_empty() {
            return Ok(());
        }

        warn!("Recovered {} contacts stuck in sending", recovered.len());

        let mut per_campaign: HashMap<(TenantId, CampaignId), u64> = HashMap::new();
        for row in &recovered {
            *per_campaign
                .entry((row.tenant_id, row.campaign_id))
                .or_insert(0) += 1;
        }

        for ((tenant_id, campaign_id), count) in per_campaign {
            self.log(
                tenant_id,
                campaign_id,
                LogSeverity::Warning,
                "recovery",
                format!("Re-queued {} contacts stuck in sending", count),
                Some(json!({ "count": count })),
            )
            .await;
        }
        Ok(())
    }

    /// Drop handles of dispatchers that have exited, surfacing panics
    async fn reap_finished(&self) {
        let mut handles = self.dispatchers.lock().await;
        let mut i = 0;
        while i < handles.len() {
            if handles[i].is_finished() {
                let handle = handles.swap_remove(i);
                if let Err(e) = handle.await {
                    error!("Campaign dispatcher panicked: {}", e);
                }
            } else {
                i += 1;
            }
        }
    }

    /// Wait for every dispatcher task to finish
    async fn drain(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.dispatchers.lock().await;
            guard.drain(..).collect()
        };

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Campaign dispatcher panicked: {}", e);
            }
        }
        info!("All campaign dispatchers stopped");
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
            warn!("Failed to write campaign log: {}", e);
        }
    }
}
