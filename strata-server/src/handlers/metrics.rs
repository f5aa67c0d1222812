use crate::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;
use strata::{MetricsSnapshot, StrategyRegistry, TieredMetrics};

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    /// Counters of the two-tier path.
    pub tiered: TieredMetrics,
    /// Counters of the remote tier alone.
    pub remote: MetricsSnapshot,
    pub l1_entries: usize,
    pub l1_capacity: usize,
}

#[derive(Debug, Serialize)]
pub struct StrategyInfo {
    pub name: &'static str,
    pub ttl_secs: u64,
    pub key_prefix: &'static str,
    pub tags: &'static [&'static str],
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let local = state.cache.local();
    Json(MetricsResponse {
        tiered: state.cache.metrics(),
        remote: state.cache.remote().metrics(),
        l1_entries: local.len(),
        l1_capacity: local.capacity(),
    })
}

/// GET /strategies
pub async fn list_strategies() -> Json<Vec<StrategyInfo>> {
    Json(
        StrategyRegistry::ALL
            .iter()
            .map(|strategy| StrategyInfo {
                name: strategy.name,
                ttl_secs: strategy.ttl.0,
                key_prefix: strategy.key_prefix,
                tags: strategy.tags,
            })
            .collect(),
    )
}
