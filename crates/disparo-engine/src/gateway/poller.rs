//! Gateway connection state poller
//!
//! Keeps `instances.connection_state` in sync with what the gateway
//! reports, so eligibility checks read fresh rows instead of calling
//! out mid-dispatch.

use anyhow::Result;
use disparo_common::config::GatewayConfig;
use disparo_storage::db::DatabasePool;
use disparo_storage::models::{ConnectionState, Instance};
use disparo_storage::repository::InstanceRepository;
use std::collections::HashMap;
use tokio::time::{interval, Duration as TokioDuration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::client::GatewayClient;

/// Map a gateway-reported status string to a connection state. Unknown
/// strings return `None`; the caller records them as the error state
/// with the raw string kept.
pub fn map_gateway_status(status: &str) -> Option<ConnectionState> {
    match status {
        "open" => Some(ConnectionState::Open),
        "close" | "closed" => Some(ConnectionState::Closed),
        "connecting" => Some(ConnectionState::Connecting),
        "qr" | "qrcode" => Some(ConnectionState::QrPending),
        _ => None,
    }
}

/// Background connection state poller
pub struct StatePoller {
    instance_repo: InstanceRepository,
    client: GatewayClient,
    poll_interval_secs: u64,
}

impl StatePoller {
    /// Create a new state poller
    pub fn new(db_pool: DatabasePool, client: GatewayClient, config: &GatewayConfig) -> Self {
        Self {
            instance_repo: InstanceRepository::new(db_pool.pool().clone()),
            client,
            poll_interval_secs: config.state_poll_interval_secs,
        }
    }

    /// Run the poller until shutdown
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(TokioDuration::from_secs(self.poll_interval_secs));

        info!(
            "Connection state poller started (interval: {}s)",
            self.poll_interval_secs
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!("Connection state poll failed: {}", e);
                    }
                }
            }
        }

        info!("Connection state poller stopped");
    }

    /// One full pass over every registered instance
    pub async fn poll_once(&self) -> Result<()> {
        let instances = self.instance_repo.list_all().await?;
        if instances.is_empty() {
            return Ok(());
        }

        // One fetch per gateway host; instances often share a base URL
        let mut by_host: HashMap<(String, String), Vec<&Instance>> = HashMap::new();
        for instance in &instances {
            by_host
                .entry((instance.base_url.clone(), instance.api_key.clone()))
                .or_default()
                .push(instance);
        }

        for ((base_url, api_key), group) in by_host {
            match self.client.fetch_instances(&base_url, &api_key).await {
                Ok(states) => {
                    let by_name: HashMap<&str, &str> = states
                        .iter()
                        .map(|s| (s.name.as_str(), s.status.as_str()))
                        .collect();

                    for instance in group {
                        let reported = by_name.get(instance.gateway_name.as_str()).copied();
                        self.apply_reported_state(instance, reported).await?;
                    }
                }
                Err(e) => {
                    for instance in group {
                        warn!("State check failed for {}: {}", instance.gateway_name, e);
                        self.instance_repo
                            .record_check_failure(instance.id, &e.to_string())
                            .await?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Refresh a single instance on demand
    pub async fn refresh_instance(&self, instance: &Instance) -> Result<()> {
        match self.client.fetch_instance_state(instance).await {
            Ok(reported) => self.apply_reported_state(instance, reported.as_deref()).await,
            Err(e) => {
                warn!("State check failed for {}: {}", instance.gateway_name, e);
                self.instance_repo
                    .record_check_failure(instance.id, &e.to_string())
                    .await?;
                Ok(())
            }
        }
    }

    async fn apply_reported_state(
        &self,
        instance: &Instance,
        reported: Option<&str>,
    ) -> Result<()> {
        match reported {
            Some(status) => match map_gateway_status(status) {
                Some(state) => {
                    let state = state.to_string();
                    if instance.connection_state != state {
                        info!(
                            "Instance {} connection state: {} -> {}",
                            instance.gateway_name, instance.connection_state, state
                        );
                    }
                    self.instance_repo
                        .update_connection_state(instance.id, &state)
                        .await?;
                }
                None => {
                    warn!(
                        "Instance {} reported unknown status {:?}",
                        instance.gateway_name, status
                    );
                    self.instance_repo
                        .mark_connection_error(
                            instance.id,
                            &format!("unknown gateway status: {}", status),
                        )
                        .await?;
                }
            },
            None => {
                self.instance_repo
                    .mark_connection_error(instance.id, "instance not found on gateway")
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_map_gateway_status() {
        assert_eq!(map_gateway_status("open"), Some(ConnectionState::Open));
        assert_eq!(map_gateway_status("close"), Some(ConnectionState::Closed));
        assert_eq!(map_gateway_status("closed"), Some(ConnectionState::Closed));
        assert_eq!(
            map_gateway_status("connecting"),
            Some(ConnectionState::Connecting)
        );
        assert_eq!(map_gateway_status("qrcode"), Some(ConnectionState::QrPending));
        assert_eq!(map_gateway_status("qr"), Some(ConnectionState::QrPending));
        assert_eq!(map_gateway_status("banana"), None);
        assert_eq!(map_gateway_status(""), None);
    }
}
