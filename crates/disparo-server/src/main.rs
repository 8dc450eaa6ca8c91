//! Disparo - dispatch platform entry point

use anyhow::Result;
use disparo_api::AppState;
use disparo_common::config::Config;
use disparo_engine::{
    CampaignManager, EngineSupervisor, GatewayClient, LoggingInboxSink, SendWorker, StatePoller,
    StatusReconciler,
};
use disparo_storage::db::DatabasePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so logging can honor it
    let config = Config::load()?;
    init_logging(&config);

    info!("Starting Disparo dispatch platform...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;
    info!("Database connection established");

    // Run migrations
    db_pool.migrate().await?;
    info!("Database migrations completed");

    // One token cancels every engine task on shutdown
    let shutdown = CancellationToken::new();

    // Gateway HTTP client shared by the worker pool and the poller
    let gateway = GatewayClient::new(&config.gateway);

    // Engine supervisor: dispatcher launch, recovery, maintenance
    let supervisor = Arc::new(EngineSupervisor::new(
        db_pool.clone(),
        &config.engine,
        shutdown.clone(),
    ));
    let supervisor_handle = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.run().await })
    };

    // Send worker pool consuming the send queue
    let send_worker = Arc::new(SendWorker::new(
        db_pool.clone(),
        gateway.clone(),
        &config.engine,
    ));
    let worker_handle = {
        let worker = send_worker.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };
    info!(
        "Send worker pool started (concurrency: {})",
        config.engine.send_concurrency
    );

    // Instance connection-state poller
    let poller = Arc::new(StatePoller::new(
        db_pool.clone(),
        gateway.clone(),
        &config.gateway,
    ));
    let poller_handle = {
        let poller = poller.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { poller.run(shutdown).await })
    };

    // API server: operator surface plus the gateway webhook ingress
    let state = Arc::new(AppState {
        db_pool: db_pool.clone(),
        manager: CampaignManager::new(&db_pool, supervisor.clone()),
        poller: poller.clone(),
        reconciler: StatusReconciler::new(&db_pool, Arc::new(LoggingInboxSink)),
        webhook_secret: config.gateway.webhook_secret.clone().unwrap_or_default(),
    });

    let app = disparo_api::create_router(state, &config.api.cors_origins);
    let bind = format!("{}:{}", config.server.bind_address, config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Starting API server on {}", bind);

    let api_shutdown = shutdown.clone();
    let api_handle = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { api_shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            error!("API server error: {}", e);
        }
    });

    info!("Disparo started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.cancel();

    // Bounded drain: in-flight sends finish, nothing new starts
    let grace = Duration::from_secs(config.engine.shutdown_grace_secs);
    let drain = async {
        let _ = supervisor_handle.await;
        let _ = worker_handle.await;
        let _ = poller_handle.await;
        let _ = api_handle.await;
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!("Shutdown grace of {:?} elapsed with tasks still running", grace);
    }

    info!("Disparo shutdown complete");
    Ok(())
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},disparo=debug", config.logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
