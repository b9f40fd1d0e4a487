mod app_state;
mod config;
mod db;
mod models;
mod routes;
mod services;
mod worker;

use axum::http::{Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::{routing::get, routing::post, Json, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use services::{cache::StatusCache, queue::JobQueue, queue::WORKERS_GROUP, vendor::VendorClient};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing dispatch-core server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!(
        "dispatch_jobs_submitted_total",
        "Total jobs accepted by the API"
    );
    metrics::describe_counter!(
        "dispatch_jobs_completed_total",
        "Total jobs that reached the complete state"
    );
    metrics::describe_counter!(
        "dispatch_jobs_failed_total",
        "Total jobs that reached the failed state"
    );
    metrics::describe_counter!(
        "dispatch_webhooks_received_total",
        "Total vendor webhooks reconciled"
    );
    metrics::describe_histogram!(
        "dispatch_vendor_call_seconds",
        "Latency of outbound vendor calls"
    );
    metrics::describe_gauge!(
        "dispatch_queue_depth",
        "Current number of messages in the job queue"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize Redis job queue and make sure the worker group exists
    tracing::info!("Connecting to Redis job queue");
    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");
    queue
        .ensure_consumer_group(WORKERS_GROUP)
        .await
        .expect("Failed to create consumer group");

    // Initialize status cache
    let cache = StatusCache::new(&config.redis_url).expect("Failed to initialize status cache");

    // Initialize vendor registry
    let vendors = VendorClient::new(config.api_base_url.clone(), config.vendor_configs());

    // Create shared application state
    let state = AppState::new(db_pool, queue, cache, vendors);

    // Build API routes
    let metrics_handle = Arc::clone(&prometheus_handle);
    let app = Router::new()
        .route("/jobs", post(routes::jobs::submit_job))
        .route("/jobs/:request_id", get(routes::jobs::get_job_status))
        .route(
            "/vendor-webhook/:vendor",
            post(routes::webhook::vendor_webhook),
        )
        .route("/health", get(routes::health::health_check))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MiB limit

    let bind_addr = config.bind_addr();
    tracing::info!("Starting dispatch-core on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Server shut down");
}

/// Unknown route handler.
async fn not_found(method: Method, uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "Not found",
            "path": uri.path(),
            "method": method.as_str(),
        })),
    )
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
    tracing::info!("Shutdown signal received");
}
