//! HTTP router for HQS

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use hqs_queue::{handle_request, QueueService};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Create the main application router
pub fn create_router(service: Arc<QueueService>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/", post(handle_request))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn health_check(State(service): State<Arc<QueueService>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "running", "queues": service.registry().len() })),
    )
}
