use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::job::{Job, JobStatus, MAX_ERROR_LEN};

/// Response after submitting a job.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub request_id: Uuid,
}

/// Response for querying job status.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            status: job.status,
            created_at: job.created_at,
            updated_at: job.updated_at,
            result: job.result,
            error: job.error,
        }
    }
}

/// Body of a vendor webhook callback.
///
/// `requestId` is required by the contract but deserialized as optional so
/// its absence surfaces as the handler's own 400 body rather than an
/// extractor rejection.
#[derive(Debug, Deserialize, Validate)]
pub struct WebhookRequest {
    #[serde(rename = "requestId", default)]
    #[garde(length(min = 1))]
    pub request_id: Option<String>,

    /// Defaults to `complete` when omitted.
    #[garde(skip)]
    pub status: Option<JobStatus>,

    #[garde(skip)]
    pub result: Option<Value>,

    #[garde(length(max = MAX_ERROR_LEN))]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
}

/// Generic error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub components: HealthComponents,
}

#[derive(Debug, Serialize)]
pub struct HealthComponents {
    pub database: bool,
    pub queue: bool,
    pub vendors: HashMap<String, bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use garde::Validate;
    use serde_json::json;

    #[test]
    fn webhook_request_parses_with_defaults() {
        let body: WebhookRequest = serde_json::from_value(json!({
            "requestId": "0d4907c5-bb42-4d3b-a111-2f41df2a7e6f"
        }))
        .unwrap();
        assert!(body.request_id.is_some());
        assert!(body.status.is_none());
        assert!(body.result.is_none());
        assert!(body.validate().is_ok());
    }

    #[test]
    fn webhook_request_still_parses_without_request_id() {
        let body: WebhookRequest =
            serde_json::from_value(json!({"status": "complete", "result": {"ok": true}}))
                .unwrap();
        assert!(body.request_id.is_none());
    }

    #[test]
    fn webhook_request_rejects_oversized_error() {
        let body: WebhookRequest = serde_json::from_value(json!({
            "requestId": "0d4907c5-bb42-4d3b-a111-2f41df2a7e6f",
            "status": "failed",
            "error": "e".repeat(1001)
        }))
        .unwrap();
        assert!(body.validate().is_err());
    }

    #[test]
    fn job_status_response_omits_absent_fields() {
        let response = JobStatusResponse {
            status: JobStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            result: None,
            error: None,
        };
        let rendered = serde_json::to_value(&response).unwrap();
        assert!(rendered.get("result").is_none());
        assert!(rendered.get("error").is_none());
        assert_eq!(rendered["status"], "pending");
    }
}
