use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Connection pool exhausted: no idle connection and maximum size reached")]
    PoolExhausted,

    #[error("Timed out after {0}ms waiting for a pooled connection")]
    AcquireTimeout(u64),

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            AppError::PoolExhausted => "POOL_EXHAUSTED",
            AppError::AcquireTimeout(_) => "ACQUIRE_TIMEOUT",
            AppError::PoolClosed => "POOL_CLOSED",
            AppError::Connection(_) => "CONNECTION_ERROR",
            AppError::Execution(_) => "EXECUTION_ERROR",
            AppError::Cache(_) => "CACHE_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let message = self.to_string();
        let (status, error_detail) = match self {
            AppError::PoolExhausted | AppError::AcquireTimeout(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorDetail::new(code, message)
                    .with_details("All connections are busy. Retry shortly or raise pool.max_size."),
            ),
            AppError::PoolClosed => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorDetail::new(code, message),
            ),
            AppError::Connection(_) => (
                StatusCode::BAD_GATEWAY,
                ErrorDetail::new(code, message),
            ),
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new(code, message),
            ),
            AppError::Execution(ref msg) => {
                let detail = ErrorDetail::new(code, message.clone());
                let detail = if msg.contains("timeout") {
                    detail.with_details("Consider simplifying your query or checking database performance.")
                } else {
                    detail
                };
                (StatusCode::INTERNAL_SERVER_ERROR, detail)
            }
            AppError::Cache(_) | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new(code, message),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_detail,
        });

        (status, body).into_response()
    }
}

/// Convert anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhausted_maps_to_service_unavailable() {
        let response = AppError::PoolExhausted.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_validation_maps_to_bad_request() {
        let response = AppError::Validation("empty".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_detail_creation() {
        let detail = ErrorDetail::new("TEST_CODE", "Test message");
        assert_eq!(detail.code, "TEST_CODE");
        assert_eq!(detail.message, "Test message");
        assert!(detail.details.is_none());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::AcquireTimeout(50).code(), "ACQUIRE_TIMEOUT");
        assert_eq!(AppError::Execution("boom".into()).code(), "EXECUTION_ERROR");
        assert_eq!(
            AppError::AcquireTimeout(50).to_string(),
            "Timed out after 50ms waiting for a pooled connection"
        );
    }
}
