use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Maximum length of a job error string.
pub const MAX_ERROR_LEN: usize = 1000;

/// Status of a dispatch job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "complete" => Some(JobStatus::Complete),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Terminal jobs are never re-dispatched by the worker.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dispatch job as persisted in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub request_id: Uuid,
    pub status: JobStatus,
    pub payload: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub vendor: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The client payload must be a JSON object. Scalars, arrays, and null are
/// rejected at the store boundary.
pub fn validate_payload(payload: &Value) -> Result<(), String> {
    if payload.is_object() {
        Ok(())
    } else {
        Err("payload must be a JSON object".to_string())
    }
}

pub fn validate_error_text(error: &str) -> Result<(), String> {
    if error.chars().count() > MAX_ERROR_LEN {
        return Err(format!("error exceeds {} characters", MAX_ERROR_LEN));
    }
    Ok(())
}

/// Terminal-state field rules: `complete` carries exactly one of
/// result/error, `failed` always carries an error.
pub fn validate_terminal_fields(
    status: JobStatus,
    result: Option<&Value>,
    error: Option<&str>,
) -> Result<(), String> {
    match status {
        JobStatus::Complete => {
            if result.is_some() == error.is_some() {
                return Err("complete jobs require exactly one of result or error".to_string());
            }
        }
        JobStatus::Failed => {
            if error.is_none() {
                return Err("failed jobs require an error".to_string());
            }
        }
        JobStatus::Pending | JobStatus::Processing => {}
    }
    if let Some(e) = error {
        validate_error_text(e)?;
    }
    Ok(())
}
