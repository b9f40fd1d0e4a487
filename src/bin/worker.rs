use dispatch_core::{
    app_state::AppState,
    config::AppConfig,
    db,
    services::{
        cache::StatusCache, queue::JobQueue, queue::WORKERS_GROUP, shutdown::ShutdownToken,
        vendor::VendorClient,
    },
    worker,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Upper bound on graceful drain after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting dispatch worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");
    queue
        .ensure_consumer_group(WORKERS_GROUP)
        .await
        .expect("Failed to create consumer group");

    let cache = StatusCache::new(&config.redis_url).expect("Failed to initialize status cache");
    let vendors = VendorClient::new(config.api_base_url.clone(), config.vendor_configs());

    let state = AppState::new(db_pool, queue, cache, vendors);
    let shutdown = ShutdownToken::new();

    tracing::info!(
        concurrency = config.worker_concurrency,
        "Worker ready, starting job processing loops"
    );

    let mut handles = Vec::new();
    for index in 0..config.worker_concurrency {
        handles.push(tokio::spawn(worker::run_worker(
            state.clone(),
            format!("worker-{index}"),
            shutdown.clone(),
        )));
    }
    handles.push(tokio::spawn(worker::run_reclaimer(
        state.clone(),
        "reclaimer".to_string(),
        shutdown.clone(),
    )));
    handles.push(tokio::spawn(worker::run_sweeper(
        state.clone(),
        shutdown.clone(),
    )));
    handles.push(tokio::spawn(worker::run_purge(
        state.clone(),
        shutdown.clone(),
    )));

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, draining workers");

    if !shutdown.drain(handles, SHUTDOWN_GRACE).await {
        tracing::warn!("Graceful drain exceeded {:?}, forcing exit", SHUTDOWN_GRACE);
        std::process::exit(1);
    }

    tracing::info!("Worker shut down");
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
