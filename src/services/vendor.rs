use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::services::breaker::{BreakerConfig, BreakerError, BreakerStats, CircuitBreaker};
use crate::services::rate_limit::RateLimiter;

/// Vendor that replies with the result in the HTTP response.
pub const SYNC_VENDOR: &str = "syncVendor";

/// Vendor that acks the request and delivers the result via webhook.
pub const ASYNC_VENDOR: &str = "asyncVendor";

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Static configuration for one vendor. Read-only after startup.
#[derive(Debug, Clone)]
pub struct VendorConfig {
    pub name: String,
    pub url: String,
    pub rate_limit_per_minute: u32,
    pub is_async: bool,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Success,
    Error,
}

/// Normalized result of a vendor call. Transport failures, non-2xx
/// responses, timeouts, and open circuits all come back as
/// `status: Error` rather than bubbling to the caller.
#[derive(Debug, Clone)]
pub struct VendorOutcome {
    pub vendor: String,
    pub is_async: bool,
    pub status: CallStatus,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl VendorOutcome {
    pub fn is_error(&self) -> bool {
        self.status == CallStatus::Error
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VendorError {
    #[error("unknown vendor: {0}")]
    UnknownVendor(String),
}

struct VendorEntry {
    config: VendorConfig,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
}

/// Registry of configured vendors. Every call waits for a rate-limit slot
/// and runs inside the vendor's circuit breaker.
pub struct VendorClient {
    http: reqwest::Client,
    api_base_url: String,
    vendors: HashMap<String, VendorEntry>,
}

impl VendorClient {
    pub fn new(api_base_url: impl Into<String>, configs: Vec<VendorConfig>) -> Self {
        let vendors = configs
            .into_iter()
            .map(|config| {
                let breaker_config = BreakerConfig {
                    // Leave room for the request timeout to fire first so
                    // failures carry the transport error message.
                    latency_threshold: Duration::from_millis(config.timeout_ms + 1_000),
                    ..BreakerConfig::default()
                };
                let entry = VendorEntry {
                    limiter: RateLimiter::new(config.rate_limit_per_minute),
                    breaker: CircuitBreaker::new(config.name.clone(), breaker_config),
                    config,
                };
                (entry.config.name.clone(), entry)
            })
            .collect();

        Self {
            http: reqwest::Client::new(),
            api_base_url: api_base_url.into(),
            vendors,
        }
    }

    pub fn vendor_names(&self) -> impl Iterator<Item = &str> {
        self.vendors.keys().map(String::as_str)
    }

    /// The circuit breaker guarding a vendor, if configured.
    pub fn breaker(&self, vendor: &str) -> Option<&CircuitBreaker> {
        self.vendors.get(vendor).map(|entry| &entry.breaker)
    }

    pub async fn breaker_stats(&self) -> HashMap<String, BreakerStats> {
        let mut stats = HashMap::new();
        for (name, entry) in &self.vendors {
            stats.insert(name.clone(), entry.breaker.stats().await);
        }
        stats
    }

    /// Dispatch a job payload to a vendor.
    ///
    /// Waits for a rate-limit slot, merges `{requestId, timestamp}` (and a
    /// `webhookUrl` for async vendors) into the body, and POSTs with an
    /// `X-Request-ID` header under the vendor's circuit breaker.
    pub async fn call(
        &self,
        vendor: &str,
        payload: &Value,
        request_id: Uuid,
    ) -> Result<VendorOutcome, VendorError> {
        let entry = self
            .vendors
            .get(vendor)
            .ok_or_else(|| VendorError::UnknownVendor(vendor.to_string()))?;

        entry.limiter.acquire().await;

        let body = self.build_body(entry, payload, request_id);
        let url = entry.config.url.clone();
        let timeout = Duration::from_millis(entry.config.timeout_ms);

        let started = std::time::Instant::now();
        let result = entry
            .breaker
            .execute(|| async {
                let response = self
                    .http
                    .post(&url)
                    .header("X-Request-ID", request_id.to_string())
                    .timeout(timeout)
                    .json(&body)
                    .send()
                    .await?
                    .error_for_status()?;
                response.json::<Value>().await
            })
            .await;
        metrics::histogram!("dispatch_vendor_call_seconds", "vendor" => vendor.to_string())
            .record(started.elapsed().as_secs_f64());

        let outcome = match result {
            Ok(data) => VendorOutcome {
                vendor: vendor.to_string(),
                is_async: entry.config.is_async,
                status: CallStatus::Success,
                data: Some(data),
                error: None,
            },
            Err(e) => {
                tracing::warn!(
                    vendor = %vendor,
                    request_id = %request_id,
                    error = %e,
                    "vendor call failed"
                );
                VendorOutcome {
                    vendor: vendor.to_string(),
                    is_async: entry.config.is_async,
                    status: CallStatus::Error,
                    data: None,
                    error: Some(Self::describe_failure(e)),
                }
            }
        };
        Ok(outcome)
    }

    /// Probe each vendor's `/health` endpoint.
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for (name, entry) in &self.vendors {
            let healthy = match Self::health_url(&entry.config.url) {
                Some(url) => self
                    .http
                    .get(url)
                    .timeout(HEALTH_PROBE_TIMEOUT)
                    .send()
                    .await
                    .map(|r| r.status().is_success())
                    .unwrap_or(false),
                None => false,
            };
            results.insert(name.clone(), healthy);
        }
        results
    }

    fn build_body(&self, entry: &VendorEntry, payload: &Value, request_id: Uuid) -> Value {
        let mut body: Map<String, Value> =
            payload.as_object().cloned().unwrap_or_default();
        body.insert("requestId".to_string(), Value::String(request_id.to_string()));
        body.insert(
            "timestamp".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        if entry.config.is_async {
            body.insert(
                "webhookUrl".to_string(),
                Value::String(format!(
                    "{}/vendor-webhook/{}",
                    self.api_base_url.trim_end_matches('/'),
                    entry.config.name
                )),
            );
        }
        Value::Object(body)
    }

    fn health_url(vendor_url: &str) -> Option<reqwest::Url> {
        let mut url = reqwest::Url::parse(vendor_url).ok()?;
        url.set_path("/health");
        url.set_query(None);
        Some(url)
    }

    fn describe_failure(e: BreakerError<reqwest::Error>) -> String {
        match e {
            BreakerError::Open(_) | BreakerError::Timeout(_, _) => e.to_string(),
            BreakerError::Inner(inner) => {
                if inner.is_timeout() {
                    format!("HTTP request failed: timed out: {inner}")
                } else {
                    format!("HTTP request failed: {inner}")
                }
            }
        }
    }
}
