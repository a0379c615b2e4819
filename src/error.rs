//! Error types for fedengine
//!
//! Every fallible operation in the engine returns `AppError`.
//! The inbox boundary converts it into an HTTP response; the job
//! workers classify it through [`AppError::is_retryable`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Authentication required (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Access denied (403)
    #[error("Access denied")]
    Forbidden,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Persistence layer failure (500)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Job queue failure (503)
    #[error("Queue error: {0}")]
    Queue(String),

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Remote server misbehaved or was unreachable (502)
    #[error("Federation error: {0}")]
    Federation(String),

    /// Signature verification failed (401)
    #[error("Invalid signature")]
    InvalidSignature,

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether a job that failed with this error is worth another attempt.
    ///
    /// Local infrastructure failures are retried; remote fetch failures and
    /// malformed input are not, so permanently unreachable servers never
    /// turn into poison jobs.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Storage(_) | AppError::Queue(_) | AppError::Internal(_)
        )
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::Validation(_) => "validation",
            AppError::Storage(_) => "storage",
            AppError::Queue(_) => "queue",
            AppError::HttpClient(_) => "http_client",
            AppError::Federation(_) => "federation",
            AppError::InvalidSignature => "invalid_signature",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, error_message) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Unauthorized | AppError::InvalidSignature => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            AppError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Queue(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Queue unavailable".to_string(),
            ),
            AppError::Federation(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::HttpClient(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::Storage(_) | AppError::Config(_) | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        crate::metrics::ERRORS_TOTAL
            .with_label_values(&[self.kind()])
            .inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
