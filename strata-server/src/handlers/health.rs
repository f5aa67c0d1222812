use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use strata::CacheHealth;

/// GET /health
///
/// 200 while the remote tier is connected, 503 while serving from the null
/// store. The body is the same either way.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<CacheHealth>) {
    let health = state.cache.health().await;
    let status = if health.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}
