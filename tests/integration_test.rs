//! Integration tests for the store, queue, cache, and sweeper.
//!
//! Note: This requires a running PostgreSQL and Redis instance
//! configured via environment variables.
//!
//! Run with: cargo test --test integration_test -- --ignored

use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use dispatch_core::{
    app_state::AppState,
    config::AppConfig,
    db::{self, queries},
    models::job::JobStatus,
    services::{cache::StatusCache, queue::JobQueue, vendor::VendorClient, vendor::ASYNC_VENDOR},
    worker,
};

async fn test_state() -> AppState {
    let config = AppConfig::from_env().expect("Failed to load config");

    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");

    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize queue");
    let cache = StatusCache::new(&config.redis_url).expect("Failed to initialize cache");
    let vendors = VendorClient::new(config.api_base_url.clone(), config.vendor_configs());

    AppState::new(db_pool, queue, cache, vendors)
}

#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_store_lifecycle() {
    let state = test_state().await;
    let request_id = Uuid::new_v4();
    let payload = json!({"type": "sync", "customer": "acme"});

    // 1. Create a pending job
    let job = queries::create(&state.db, request_id, &payload)
        .await
        .expect("Failed to create job");
    assert_eq!(job.request_id, request_id);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.payload, payload);
    assert!(job.vendor.is_none());
    assert!(job.updated_at >= job.created_at);

    // 2. Duplicate IDs are rejected
    let duplicate = queries::create(&state.db, request_id, &payload).await;
    assert!(matches!(duplicate, Err(queries::StoreError::Duplicate(_))));

    // 3. Non-object payloads are rejected
    let bad = queries::create(&state.db, Uuid::new_v4(), &json!("scalar")).await;
    assert!(matches!(bad, Err(queries::StoreError::Validation(_))));

    // 4. Round trip
    let fetched = queries::find_by_id(&state.db, request_id)
        .await
        .expect("Failed to fetch job")
        .expect("Job not found");
    assert_eq!(fetched.request_id, request_id);
    assert_eq!(fetched.payload, payload);

    // 5. Mark processing records the vendor
    let marked = queries::mark_processing(&state.db, request_id, "syncVendor")
        .await
        .expect("Failed to mark processing");
    assert!(marked);
    let processing = queries::find_by_id(&state.db, request_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(processing.status, JobStatus::Processing);
    assert_eq!(processing.vendor.as_deref(), Some("syncVendor"));
    assert!(processing.updated_at >= fetched.updated_at);

    // 6. Terminal writes enforce the result/error rules
    let invalid = queries::update_result(&state.db, request_id, JobStatus::Complete, None, None)
        .await;
    assert!(matches!(invalid, Err(queries::StoreError::Validation(_))));

    queries::update_result(
        &state.db,
        request_id,
        JobStatus::Complete,
        Some(&json!({"ok": true})),
        None,
    )
    .await
    .expect("Failed to complete job");

    // 7. Terminal jobs cannot move back to non-terminal statuses
    let regress = queries::update_status(&state.db, request_id, JobStatus::Pending).await;
    assert!(matches!(regress, Err(queries::StoreError::Validation(_))));

    // 8. A redelivered message no longer re-marks the job
    let remarked = queries::mark_processing(&state.db, request_id, "syncVendor")
        .await
        .expect("mark_processing on terminal job");
    assert!(!remarked);

    // 9. Unknown IDs surface NotFound
    let missing = queries::update_status(&state.db, Uuid::new_v4(), JobStatus::Processing).await;
    assert!(matches!(missing, Err(queries::StoreError::NotFound(_))));

    // 10. Indexed queries and stats
    let complete = queries::find_by_status(&state.db, JobStatus::Complete, 10)
        .await
        .expect("find_by_status failed");
    assert!(complete.iter().any(|j| j.request_id == request_id));

    let by_vendor = queries::find_by_vendor(&state.db, "syncVendor", 10)
        .await
        .expect("find_by_vendor failed");
    assert!(by_vendor.iter().any(|j| j.request_id == request_id));

    let recent = queries::find_recent(&state.db, 1).await.expect("find_recent failed");
    assert!(recent.iter().any(|j| j.request_id == request_id));

    let stats = queries::stats(&state.db).await.expect("stats failed");
    assert!(stats.total >= 1);
    assert!(stats.by_status.get("complete").copied().unwrap_or(0) >= 1);
    assert!(stats.by_vendor.get("syncVendor").copied().unwrap_or(0) >= 1);

    assert!(queries::health_check(&state.db).await);

    // 11. Purge never removes fresh jobs
    queries::purge_expired(&state.db).await.expect("purge failed");
    assert!(queries::find_by_id(&state.db, request_id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
#[ignore]
async fn test_queue_consume_ack_cycle() {
    let state = test_state().await;
    let group = format!("test-group-{}", Uuid::new_v4());
    state
        .queue
        .ensure_consumer_group(&group)
        .await
        .expect("Failed to create group");
    // Idempotent re-creation
    state
        .queue
        .ensure_consumer_group(&group)
        .await
        .expect("Group re-creation should be a no-op");

    let request_id = Uuid::new_v4();
    let payload = json!({"type": "async", "n": 7});
    let message_id = state
        .queue
        .enqueue(request_id, &payload)
        .await
        .expect("Failed to enqueue");
    assert!(!message_id.is_empty());

    let messages = state
        .queue
        .consume(&group, "consumer-a", 10, Duration::from_secs(1))
        .await
        .expect("Failed to consume");
    let delivered = messages
        .iter()
        .find(|m| m.request_id == request_id)
        .expect("enqueued message was not delivered");
    assert_eq!(delivered.payload, payload);

    state
        .queue
        .ack(&group, &delivered.message_id)
        .await
        .expect("Failed to ack");

    // Acked messages are not redelivered to the group
    let redelivered = state
        .queue
        .claim_stale(&group, "consumer-b", Duration::from_millis(0), 100)
        .await
        .expect("claim_stale failed");
    assert!(redelivered.iter().all(|m| m.message_id != delivered.message_id));

    assert!(state.queue.health_check().await.is_ok());
    assert!(state.queue.depth().await.expect("depth failed") >= 1);
}

#[tokio::test]
#[ignore]
async fn test_unacked_messages_are_reclaimed() {
    let state = test_state().await;
    let group = format!("test-group-{}", Uuid::new_v4());
    state.queue.ensure_consumer_group(&group).await.unwrap();

    let request_id = Uuid::new_v4();
    state
        .queue
        .enqueue(request_id, &json!({"n": 1}))
        .await
        .unwrap();

    // Deliver to a consumer that never acks.
    let messages = state
        .queue
        .consume(&group, "crashed-consumer", 10, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(messages.iter().any(|m| m.request_id == request_id));

    // Another consumer claims the stale delivery.
    let claimed = state
        .queue
        .claim_stale(&group, "recovery-consumer", Duration::from_millis(0), 100)
        .await
        .unwrap();
    assert!(claimed.iter().any(|m| m.request_id == request_id));
}

#[tokio::test]
#[ignore]
async fn test_cache_roundtrip_and_invalidate() {
    let state = test_state().await;
    let request_id = Uuid::new_v4();
    let payload = json!({"type": "sync"});

    let job = queries::create(&state.db, request_id, &payload)
        .await
        .expect("Failed to create job");

    assert!(state.cache.get(request_id).await.is_none());

    state.cache.put(&job).await;
    let cached = state.cache.get(request_id).await.expect("cache miss");
    assert_eq!(cached.request_id, request_id);
    assert_eq!(cached.status, JobStatus::Pending);

    state.cache.invalidate(request_id).await;
    assert!(state.cache.get(request_id).await.is_none());
}

#[tokio::test]
#[ignore]
async fn test_sweeper_fails_stuck_async_jobs() {
    let state = test_state().await;
    let request_id = Uuid::new_v4();

    queries::create(&state.db, request_id, &json!({"type": "async"}))
        .await
        .expect("Failed to create job");
    queries::mark_processing(&state.db, request_id, ASYNC_VENDOR)
        .await
        .expect("Failed to mark processing");

    // Backdate the job past the webhook deadline.
    sqlx::query(
        "UPDATE jobs SET created_at = NOW() - INTERVAL '11 minutes', \
         updated_at = NOW() - INTERVAL '10 minutes' WHERE request_id = $1",
    )
        .bind(request_id)
        .execute(&state.db)
        .await
        .expect("Failed to backdate job");

    worker::sweep_once(&state).await.expect("sweep failed");

    let swept = queries::find_by_id(&state.db, request_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(swept.status, JobStatus::Failed);
    assert_eq!(swept.error.as_deref(), Some(worker::TIMEOUT_ERROR));
}
