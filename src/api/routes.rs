use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api::handlers::{monitoring, query, AppState};
use crate::services::executor::RawExecutor;

/// Create router with application state
pub fn create_router<E: RawExecutor>(state: AppState<E>) -> Router {
    Router::new()
        .route("/health", get(monitoring::health_check::<E>))
        .route("/api/query", post(query::execute_query::<E>))
        .route("/api/query/explain", post(query::explain_query::<E>))
        .route("/api/metrics", get(monitoring::get_metrics::<E>))
        .route("/api/metrics/reset", post(monitoring::reset_metrics::<E>))
        .route("/api/report", get(monitoring::get_report::<E>))
        .route("/api/slow-queries", get(monitoring::list_slow_queries::<E>))
        .route(
            "/api/index-suggestions",
            get(monitoring::list_index_suggestions::<E>),
        )
        .route("/api/cache/clear", post(monitoring::clear_cache::<E>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
