use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::job::{
    validate_payload, validate_terminal_fields, Job, JobStatus,
};

/// Errors surfaced by the job store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} already exists")]
    Duplicate(Uuid),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(sqlx::FromRow)]
struct JobRow {
    request_id: Uuid,
    status: String,
    payload: Value,
    result: Option<Value>,
    error: Option<String>,
    vendor: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn into_job(self) -> Job {
        Job {
            request_id: self.request_id,
            status: JobStatus::parse(&self.status).unwrap_or(JobStatus::Pending),
            payload: self.payload,
            result: self.result,
            error: self.error,
            vendor: self.vendor,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const JOB_COLUMNS: &str =
    "request_id, status, payload, result, error, vendor, created_at, updated_at";

/// Insert a new pending job.
pub async fn create(
    pool: &PgPool,
    request_id: Uuid,
    payload: &Value,
) -> Result<Job, StoreError> {
    validate_payload(payload).map_err(StoreError::Validation)?;

    let row = sqlx::query_as::<_, JobRow>(
        r#"
        INSERT INTO jobs (request_id, status, payload)
        VALUES ($1, 'pending', $2)
        RETURNING request_id, status, payload, result, error, vendor, created_at, updated_at
        "#,
    )
    .bind(request_id)
    .bind(payload)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if e.as_database_error()
            .is_some_and(|db| db.is_unique_violation())
        {
            StoreError::Duplicate(request_id)
        } else {
            StoreError::Database(e)
        }
    })?;

    Ok(row.into_job())
}

/// Get a job by request ID.
pub async fn find_by_id(pool: &PgPool, request_id: Uuid) -> Result<Option<Job>, StoreError> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE request_id = $1"
    ))
    .bind(request_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(JobRow::into_job))
}

/// Write a job's status. Terminal jobs cannot be moved back to a
/// non-terminal status; terminal re-writes stay permitted for idempotent
/// webhook redelivery.
pub async fn update_status(
    pool: &PgPool,
    request_id: Uuid,
    status: JobStatus,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = $2, updated_at = NOW()
        WHERE request_id = $1
          AND (status NOT IN ('complete', 'failed') OR $2 IN ('complete', 'failed'))
        "#,
    )
    .bind(request_id)
    .bind(status.as_str())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return match find_by_id(pool, request_id).await? {
            None => Err(StoreError::NotFound(request_id)),
            Some(job) => Err(StoreError::Validation(format!(
                "cannot move {} job back to {}",
                job.status, status
            ))),
        };
    }
    Ok(())
}

/// Mark a job as processing and record the vendor it was dispatched to.
/// Returns `false` without writing when the job is already terminal, so a
/// redelivered message never re-dispatches a finished job.
pub async fn mark_processing(
    pool: &PgPool,
    request_id: Uuid,
    vendor: &str,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'processing', vendor = $2, updated_at = NOW()
        WHERE request_id = $1 AND status IN ('pending', 'processing')
        "#,
    )
    .bind(request_id)
    .bind(vendor)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return match find_by_id(pool, request_id).await? {
            None => Err(StoreError::NotFound(request_id)),
            Some(_) => Ok(false),
        };
    }
    Ok(true)
}

/// Write terminal fields and status.
pub async fn update_result(
    pool: &PgPool,
    request_id: Uuid,
    status: JobStatus,
    result: Option<&Value>,
    error: Option<&str>,
) -> Result<(), StoreError> {
    validate_terminal_fields(status, result, error).map_err(StoreError::Validation)?;

    let outcome = sqlx::query(
        r#"
        UPDATE jobs
        SET status = $2, result = $3, error = $4, updated_at = NOW()
        WHERE request_id = $1
        "#,
    )
    .bind(request_id)
    .bind(status.as_str())
    .bind(result)
    .bind(error)
    .execute(pool)
    .await?;

    if outcome.rows_affected() == 0 {
        return Err(StoreError::NotFound(request_id));
    }
    Ok(())
}

/// Jobs in a given status, most recently updated first.
pub async fn find_by_status(
    pool: &PgPool,
    status: JobStatus,
    limit: i64,
) -> Result<Vec<Job>, StoreError> {
    let rows = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE status = $1 ORDER BY updated_at DESC LIMIT $2"
    ))
    .bind(status.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(JobRow::into_job).collect())
}

/// Jobs dispatched to a given vendor, most recently updated first.
pub async fn find_by_vendor(
    pool: &PgPool,
    vendor: &str,
    limit: i64,
) -> Result<Vec<Job>, StoreError> {
    let rows = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE vendor = $1 ORDER BY updated_at DESC LIMIT $2"
    ))
    .bind(vendor)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(JobRow::into_job).collect())
}

/// Jobs created within the last `hours` hours.
pub async fn find_recent(pool: &PgPool, hours: i64) -> Result<Vec<Job>, StoreError> {
    let cutoff = Utc::now() - Duration::hours(hours);
    let rows = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE created_at >= $1 ORDER BY created_at DESC"
    ))
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(JobRow::into_job).collect())
}

/// Async-vendor jobs stuck in `processing` since before `cutoff`. Used by
/// the timeout sweeper.
pub async fn find_timed_out(
    pool: &PgPool,
    vendor: &str,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Job>, StoreError> {
    let rows = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        SELECT {JOB_COLUMNS} FROM jobs
        WHERE status = 'processing' AND vendor = $1 AND updated_at < $2
        "#
    ))
    .bind(vendor)
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(JobRow::into_job).collect())
}

/// Aggregate job counts.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobStats {
    pub total: i64,
    pub by_status: HashMap<String, i64>,
    pub by_vendor: HashMap<String, i64>,
}

pub async fn stats(pool: &PgPool) -> Result<JobStats, StoreError> {
    let status_rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
            .fetch_all(pool)
            .await?;

    let vendor_rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT vendor, COUNT(*) FROM jobs WHERE vendor IS NOT NULL GROUP BY vendor",
    )
    .fetch_all(pool)
    .await?;

    let total = status_rows.iter().map(|(_, n)| n).sum();
    Ok(JobStats {
        total,
        by_status: status_rows.into_iter().collect(),
        by_vendor: vendor_rows.into_iter().collect(),
    })
}

/// Store connectivity probe.
pub async fn health_check(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

/// Delete terminal jobs older than 30 days. Non-terminal jobs are never
/// purged regardless of age.
pub async fn purge_expired(pool: &PgPool) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r#"
        DELETE FROM jobs
        WHERE status IN ('complete', 'failed')
          AND created_at < NOW() - INTERVAL '30 days'
        "#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
