//! Operational endpoints
//!
//! - GET /metrics - Prometheus text exposition
//! - GET /health - liveness plus job queue state

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TextEncoder};

use crate::AppState;
use crate::metrics::{QUEUE_DEPTH, REGISTRY};

pub fn operations_router() -> Router<AppState> {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    QUEUE_DEPTH.set(state.queue.len().await as i64);

    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&REGISTRY.gather()) {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type())],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "queue": {
            "pending": state.queue.len().await,
            "failed": state.queue.failed_jobs().await.len(),
        },
    }))
}
