use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries::{self, StoreError};
use crate::models::api::{ErrorResponse, JobStatusResponse, SubmitJobResponse};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message)))
}

fn internal_error(message: impl Into<String>) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(message)),
    )
}

/// POST /jobs — accept a payload, persist a pending job, enqueue it, and
/// return the request ID immediately.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<SubmitJobResponse>, ApiError> {
    let is_valid_object = payload.as_object().is_some_and(|map| !map.is_empty());
    if !is_valid_object {
        return Err(bad_request("request body must be a non-empty JSON object"));
    }

    let request_id = Uuid::new_v4();
    queries::create(&state.db, request_id, &payload)
        .await
        .map_err(|e| match e {
            StoreError::Validation(message) => bad_request(message),
            // Should not occur under v4 generation.
            other => {
                tracing::error!(request_id = %request_id, error = %other, "job create failed");
                internal_error("failed to create job")
            }
        })?;

    state
        .queue
        .enqueue(request_id, &payload)
        .await
        .map_err(|e| {
            tracing::error!(request_id = %request_id, error = %e, "enqueue failed");
            internal_error("failed to enqueue job")
        })?;

    metrics::counter!("dispatch_jobs_submitted_total").increment(1);
    tracing::info!(request_id = %request_id, "job accepted and queued");

    Ok(Json(SubmitJobResponse { request_id }))
}

/// GET /jobs/:request_id — read job status through the cache.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    if let Some(job) = state.cache.get(request_id).await {
        return Ok(Json(job.into()));
    }

    let job = queries::find_by_id(&state.db, request_id)
        .await
        .map_err(|e| {
            tracing::error!(request_id = %request_id, error = %e, "job lookup failed");
            internal_error("failed to look up job")
        })?
        .ok_or((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("Job not found")),
        ))?;

    state.cache.put(&job).await;
    Ok(Json(job.into()))
}
