use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries::{self, StoreError};
use crate::models::api::{ErrorResponse, WebhookRequest, WebhookResponse};
use crate::models::job::JobStatus;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// POST /vendor-webhook/:vendor — reconcile an async vendor callback with
/// its pending job.
///
/// Idempotent: a redelivered webhook overwrites the terminal fields with
/// the later value. An unknown request ID is a 400 (the vendor may retry),
/// never a 5xx.
pub async fn vendor_webhook(
    State(state): State<AppState>,
    Path(vendor): Path<String>,
    Json(body): Json<WebhookRequest>,
) -> Result<Json<WebhookResponse>, ApiError> {
    if let Err(report) = body.validate() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(format!("invalid webhook body: {report}"))),
        ));
    }

    let Some(raw_request_id) = body.request_id.as_deref() else {
        tracing::warn!(vendor = %vendor, "webhook missing requestId");
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("missing requestId")),
        ));
    };
    let request_id = Uuid::parse_str(raw_request_id).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("requestId must be a UUID")),
        )
    })?;

    let status = body.status.unwrap_or(JobStatus::Complete);
    if !status.is_terminal() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                "webhook status must be complete or failed",
            )),
        ));
    }

    let result = queries::update_result(
        &state.db,
        request_id,
        status,
        body.result.as_ref(),
        body.error.as_deref(),
    )
    .await;

    match result {
        Ok(()) => {
            state.cache.invalidate(request_id).await;
            metrics::counter!("dispatch_webhooks_received_total", "vendor" => vendor.clone())
                .increment(1);
            if status == JobStatus::Failed {
                metrics::counter!("dispatch_jobs_failed_total").increment(1);
            } else {
                metrics::counter!("dispatch_jobs_completed_total").increment(1);
            }
            tracing::info!(
                request_id = %request_id,
                vendor = %vendor,
                status = %status,
                "webhook reconciled"
            );
            Ok(Json(WebhookResponse { success: true }))
        }
        Err(StoreError::NotFound(_)) => {
            tracing::warn!(request_id = %request_id, vendor = %vendor, "webhook for unknown job");
            Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("unknown requestId")),
            ))
        }
        Err(StoreError::Validation(message)) => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(message)),
        )),
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "webhook update failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("failed to record webhook result")),
            ))
        }
    }
}
