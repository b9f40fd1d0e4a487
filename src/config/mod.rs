use serde::Deserialize;

use crate::services::vendor::{VendorConfig, ASYNC_VENDOR, SYNC_VENDOR};

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// HTTP listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the job queue and status cache
    pub redis_url: String,

    /// Public base URL of this service, used to build vendor webhook URLs
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Synchronous vendor endpoint
    pub sync_vendor_url: String,

    /// Asynchronous vendor endpoint
    pub async_vendor_url: String,

    /// Requests per minute admitted to the sync vendor
    #[serde(default = "default_sync_vendor_rate_limit")]
    pub sync_vendor_rate_limit: u32,

    /// Requests per minute admitted to the async vendor
    #[serde(default = "default_async_vendor_rate_limit")]
    pub async_vendor_rate_limit: u32,

    /// Sync vendor request timeout in milliseconds
    #[serde(default = "default_sync_vendor_timeout")]
    pub sync_vendor_timeout: u64,

    /// Async vendor request timeout in milliseconds
    #[serde(default = "default_async_vendor_timeout")]
    pub async_vendor_timeout: u64,

    /// Number of concurrent worker loops in the worker process
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
}

fn default_port() -> u16 {
    8080
}

fn default_api_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_sync_vendor_rate_limit() -> u32 {
    60
}

fn default_async_vendor_rate_limit() -> u32 {
    30
}

fn default_sync_vendor_timeout() -> u64 {
    5000
}

fn default_async_vendor_timeout() -> u64 {
    10000
}

fn default_worker_concurrency() -> usize {
    4
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    /// The fixed vendor registry for this deployment.
    pub fn vendor_configs(&self) -> Vec<VendorConfig> {
        vec![
            VendorConfig {
                name: SYNC_VENDOR.to_string(),
                url: self.sync_vendor_url.clone(),
                rate_limit_per_minute: self.sync_vendor_rate_limit,
                is_async: false,
                timeout_ms: self.sync_vendor_timeout,
            },
            VendorConfig {
                name: ASYNC_VENDOR.to_string(),
                url: self.async_vendor_url.clone(),
                rate_limit_per_minute: self.async_vendor_rate_limit,
                is_async: true,
                timeout_ms: self.async_vendor_timeout,
            },
        ]
    }
}
