//! Worker, redelivery, and sweeper loops shared by the worker binary.

use std::time::Duration;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::job::JobStatus;
use crate::services::queue::{QueueMessage, WORKERS_GROUP};
use crate::services::scrub::scrub;
use crate::services::shutdown::ShutdownToken;
use crate::services::vendor::{VendorError, ASYNC_VENDOR, SYNC_VENDOR};

/// How long a consume call blocks waiting for work.
const CONSUME_BLOCK: Duration = Duration::from_secs(1);

/// Pause after a loop-level failure before retrying.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Deliveries idle longer than this are reclaimed for the group.
const VISIBILITY_WINDOW: Duration = Duration::from_secs(60);

/// How often stale deliveries are reclaimed.
const RECLAIM_INTERVAL: Duration = Duration::from_secs(30);

/// How often the timeout sweeper runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(120);

/// Async jobs stuck in `processing` longer than this are failed.
const WEBHOOK_DEADLINE_MINS: i64 = 5;

/// How often terminal jobs past the retention window are purged.
const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Approximate number of entries kept in the queue stream.
const STREAM_RETENTION: usize = 100_000;

pub const TIMEOUT_ERROR: &str = "Job timed out - no webhook received";

/// Pick the vendor for a payload. `type: "sync"` or an absent `type` routes
/// to the sync vendor; anything else routes to the async vendor. Pure.
pub fn select_vendor(payload: &serde_json::Value) -> &'static str {
    match payload.get("type") {
        None => SYNC_VENDOR,
        Some(serde_json::Value::String(s)) if s == "sync" => SYNC_VENDOR,
        Some(_) => ASYNC_VENDOR,
    }
}

/// One worker loop. Consumes from the shared `workers` group until the
/// shutdown token fires; loop-level errors are logged and retried after a
/// short sleep.
pub async fn run_worker(state: AppState, worker_id: String, shutdown: ShutdownToken) {
    tracing::info!(worker_id = %worker_id, "worker loop started");
    while !shutdown.is_shutdown() {
        match process_batch(&state, &worker_id).await {
            Ok(_) => {}
            Err(e) => {
                tracing::error!(worker_id = %worker_id, error = %e, "worker iteration failed");
                tokio::select! {
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    _ = shutdown.requested() => {}
                }
            }
        }
    }
    tracing::info!(worker_id = %worker_id, "worker loop stopped");
}

async fn process_batch(
    state: &AppState,
    worker_id: &str,
) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
    let messages = state
        .queue_breaker
        .execute(|| state.queue.consume(WORKERS_GROUP, worker_id, 1, CONSUME_BLOCK))
        .await?;

    let count = messages.len();
    for message in messages {
        process_message(state, &message).await?;
        // Ack unconditionally once the vendor has been invoked; redelivery
        // after dispatch is undesirable.
        state
            .queue_breaker
            .execute(|| state.queue.ack(WORKERS_GROUP, &message.message_id))
            .await?;
    }
    Ok(count)
}

/// Handle one queue message end to end. Idempotent with respect to job
/// status: terminal jobs are never re-dispatched.
pub async fn process_message(
    state: &AppState,
    message: &QueueMessage,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let request_id = message.request_id;

    let Some(job) = state
        .store_breaker
        .execute(|| queries::find_by_id(&state.db, request_id))
        .await?
    else {
        tracing::warn!(request_id = %request_id, "queued message for unknown job, dropping");
        return Ok(());
    };
    if job.status.is_terminal() {
        tracing::debug!(request_id = %request_id, status = %job.status, "job already terminal, skipping");
        return Ok(());
    }

    let vendor = select_vendor(&message.payload);
    let marked = state
        .store_breaker
        .execute(|| queries::mark_processing(&state.db, request_id, vendor))
        .await?;
    if !marked {
        // A webhook finalized the job between the status check and the mark.
        return Ok(());
    }

    tracing::info!(request_id = %request_id, vendor = %vendor, "dispatching job");

    let outcome = match state.vendors.call(vendor, &message.payload, request_id).await {
        Ok(outcome) => outcome,
        Err(VendorError::UnknownVendor(name)) => {
            let error = format!("unknown vendor: {name}");
            state
                .store_breaker
                .execute(|| {
                    queries::update_result(
                        &state.db,
                        request_id,
                        JobStatus::Failed,
                        None,
                        Some(&error),
                    )
                })
                .await?;
            state.cache.invalidate(request_id).await;
            metrics::counter!("dispatch_jobs_failed_total").increment(1);
            return Ok(());
        }
    };

    if outcome.is_error() {
        let error = outcome
            .error
            .unwrap_or_else(|| "HTTP request failed".to_string());
        // Store errors are capped at 1000 chars; truncate rather than fail.
        let error: String = error.chars().take(crate::models::job::MAX_ERROR_LEN).collect();
        state
            .store_breaker
            .execute(|| {
                queries::update_result(&state.db, request_id, JobStatus::Failed, None, Some(&error))
            })
            .await?;
        state.cache.invalidate(request_id).await;
        metrics::counter!("dispatch_jobs_failed_total").increment(1);
        tracing::warn!(request_id = %request_id, vendor = %vendor, error = %error, "job failed");
        return Ok(());
    }

    if outcome.is_async {
        // The vendor acked; the webhook finalizes the job later.
        tracing::debug!(request_id = %request_id, vendor = %vendor, "awaiting webhook");
        return Ok(());
    }

    let cleaned = scrub(&outcome.data.unwrap_or(serde_json::Value::Null));
    state
        .store_breaker
        .execute(|| {
            queries::update_result(&state.db, request_id, JobStatus::Complete, Some(&cleaned), None)
        })
        .await?;
    state.cache.invalidate(request_id).await;
    metrics::counter!("dispatch_jobs_completed_total").increment(1);
    tracing::info!(request_id = %request_id, vendor = %vendor, "job complete");
    Ok(())
}

/// Reclaim deliveries whose consumer died before acking and process them.
/// Also refreshes the queue-depth gauge.
pub async fn run_reclaimer(state: AppState, consumer: String, shutdown: ShutdownToken) {
    let mut ticker = tokio::time::interval(RECLAIM_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.requested() => break,
        }

        if let Ok(depth) = state.queue.depth().await {
            metrics::gauge!("dispatch_queue_depth").set(depth as f64);
        }
        if let Err(e) = state.queue.trim(STREAM_RETENTION).await {
            tracing::warn!(error = %e, "stream trim failed");
        }

        let claimed = match state
            .queue
            .claim_stale(WORKERS_GROUP, &consumer, VISIBILITY_WINDOW, 10)
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::error!(error = %e, "stale delivery reclaim failed");
                continue;
            }
        };

        for message in claimed {
            tracing::warn!(
                message_id = %message.message_id,
                request_id = %message.request_id,
                "reprocessing stale delivery"
            );
            match process_message(&state, &message).await {
                Ok(()) => {
                    if let Err(e) = state.queue.ack(WORKERS_GROUP, &message.message_id).await {
                        tracing::error!(error = %e, "ack of reclaimed message failed");
                    }
                }
                Err(e) => {
                    tracing::error!(
                        request_id = %message.request_id,
                        error = %e,
                        "reclaimed message processing failed"
                    );
                }
            }
        }
    }
    tracing::info!("reclaimer stopped");
}

/// Periodically fail async-vendor jobs stuck in `processing` past the
/// webhook deadline. Sync-vendor jobs finalize inline and are not swept.
pub async fn run_sweeper(state: AppState, shutdown: ShutdownToken) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.requested() => break,
        }
        if let Err(e) = sweep_once(&state).await {
            tracing::error!(error = %e, "timeout sweep failed");
        }
    }
    tracing::info!("sweeper stopped");
}

pub async fn sweep_once(state: &AppState) -> Result<usize, queries::StoreError> {
    let cutoff = chrono::Utc::now() - chrono::Duration::minutes(WEBHOOK_DEADLINE_MINS);
    let stuck = queries::find_timed_out(&state.db, ASYNC_VENDOR, cutoff).await?;
    let count = stuck.len();

    for job in stuck {
        queries::update_result(
            &state.db,
            job.request_id,
            JobStatus::Failed,
            None,
            Some(TIMEOUT_ERROR),
        )
        .await?;
        state.cache.invalidate(job.request_id).await;
        metrics::counter!("dispatch_jobs_failed_total").increment(1);
        tracing::warn!(request_id = %job.request_id, "job timed out waiting for webhook");
    }
    Ok(count)
}

/// Hourly purge of terminal jobs older than the 30-day retention window.
pub async fn run_purge(state: AppState, shutdown: ShutdownToken) {
    let mut ticker = tokio::time::interval(PURGE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.requested() => break,
        }
        match queries::purge_expired(&state.db).await {
            Ok(0) => {}
            Ok(purged) => tracing::info!(purged, "purged expired jobs"),
            Err(e) => tracing::error!(error = %e, "purge failed"),
        }
    }
    tracing::info!("purge loop stopped");
}
