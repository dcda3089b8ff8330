use axum::{extract::State, Json};
use serde_json::json;

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{ExplainRequest, QueryRequest};
use crate::services::executor::RawExecutor;

fn require_sql(sql: &str) -> Result<&str, AppError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("SQL query cannot be empty".to_string()));
    }
    Ok(trimmed)
}

/// Execute a statement through the cache and connection pool
pub async fn execute_query<E: RawExecutor>(
    State(state): State<AppState<E>>,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let sql = require_sql(&payload.sql)?;
    tracing::debug!(params = payload.params.len(), "Executing query: {}", sql);

    let result = state
        .service
        .query(sql, &payload.params, payload.options())
        .await?;

    Ok(Json(json!({
        "rows": result.rows,
        "row_count": result.row_count,
    })))
}

/// Run a statement's plan and return optimization advice
pub async fn explain_query<E: RawExecutor>(
    State(state): State<AppState<E>>,
    Json(payload): Json<ExplainRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let sql = require_sql(&payload.sql)?;
    let suggestions = state.service.explain(sql, &payload.params).await?;

    Ok(Json(json!({
        "sql": sql,
        "suggestions": suggestions,
    })))
}
