use sqlx::PgPool;
use std::sync::Arc;

use crate::services::breaker::{BreakerConfig, CircuitBreaker};
use crate::services::{cache::StatusCache, queue::JobQueue, vendor::VendorClient};

/// Shared application state passed to route handlers and worker loops.
///
/// Each vendor carries its own breaker inside [`VendorClient`]; the store
/// and queue breakers guard the worker's hot path.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Arc<JobQueue>,
    pub cache: Arc<StatusCache>,
    pub vendors: Arc<VendorClient>,
    pub store_breaker: Arc<CircuitBreaker>,
    pub queue_breaker: Arc<CircuitBreaker>,
}

impl AppState {
    pub fn new(db: PgPool, queue: JobQueue, cache: StatusCache, vendors: VendorClient) -> Self {
        Self {
            db,
            queue: Arc::new(queue),
            cache: Arc::new(cache),
            vendors: Arc::new(vendors),
            store_breaker: Arc::new(CircuitBreaker::new("store", BreakerConfig::default())),
            queue_breaker: Arc::new(CircuitBreaker::new("queue", BreakerConfig::default())),
        }
    }
}
