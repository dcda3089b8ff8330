use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::HealthStatus;
use crate::services::executor::RawExecutor;
use crate::services::monitor::PerformanceReport;
use crate::services::query_service::HealthReport;

const DEFAULT_SLOW_QUERY_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct SlowQueryParams {
    pub limit: Option<usize>,
}

/// Liveness probe backed by a real round-trip through the pool
pub async fn health_check<E: RawExecutor>(
    State(state): State<AppState<E>>,
) -> (StatusCode, Json<HealthReport>) {
    let report = state.service.health_check().await;
    let status = match report.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}

pub async fn get_metrics<E: RawExecutor>(
    State(state): State<AppState<E>>,
) -> Json<serde_json::Value> {
    state.service.refresh_pool_usage();
    let metrics = state.service.metrics();
    Json(json!({
        "error_rate": metrics.error_rate(),
        "cache_hit_rate": metrics.cache_hit_rate(),
        "metrics": metrics,
        "pool": state.service.pool_status(),
        "cache": state.service.cache_stats(),
        "cache_size": state.service.cache_size(),
    }))
}

pub async fn get_report<E: RawExecutor>(
    State(state): State<AppState<E>>,
) -> Json<PerformanceReport> {
    state.service.refresh_pool_usage();
    Json(state.monitor.report())
}

/// Most recent slow queries, newest first
pub async fn list_slow_queries<E: RawExecutor>(
    State(state): State<AppState<E>>,
    Query(params): Query<SlowQueryParams>,
) -> Json<serde_json::Value> {
    let limit = params.limit.unwrap_or(DEFAULT_SLOW_QUERY_LIMIT);
    Json(json!({
        "threshold_ms": state.config.slow_query.threshold_ms,
        "slow_queries": state.service.slow_queries(limit),
    }))
}

pub async fn list_index_suggestions<E: RawExecutor>(
    State(state): State<AppState<E>>,
) -> Json<serde_json::Value> {
    Json(json!({
        "suggestions": state.service.index_suggestions(),
    }))
}

pub async fn clear_cache<E: RawExecutor>(
    State(state): State<AppState<E>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let cleared = state.service.clear_cache()?;
    tracing::info!("Cleared {} cached results", cleared);
    Ok(Json(json!({ "ok": true, "cleared": cleared })))
}

pub async fn reset_metrics<E: RawExecutor>(
    State(state): State<AppState<E>>,
) -> Json<serde_json::Value> {
    state.service.reset_metrics();
    Json(json!({ "ok": true }))
}
