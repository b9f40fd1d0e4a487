use axum::extract::State;
use axum::Json;
use chrono::Utc;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::api::{HealthComponents, HealthResponse};

/// GET /health — dependency status. Always 200; `status` is `healthy` only
/// when every component responds.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = queries::health_check(&state.db).await;
    let queue = state.queue.health_check().await.is_ok();
    let vendors = state.vendors.health_check_all().await;

    let all_healthy = database && queue && vendors.values().all(|healthy| *healthy);

    Json(HealthResponse {
        status: if all_healthy {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        timestamp: Utc::now(),
        components: HealthComponents {
            database,
            queue,
            vendors,
        },
    })
}
