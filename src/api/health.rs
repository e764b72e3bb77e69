//! Health and status endpoints

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use serde_json::Value;

use super::ApiState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Device status assembled from retained topics
#[derive(Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub topic_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
    pub retained_topics: usize,
}

/// Liveness probe
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let retained = |suffix: &str| {
        state
            .bus
            .retained(&state.bus.topic(suffix))
            .and_then(|payload| serde_json::from_str(&payload).ok())
    };

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        topic_prefix: state.bus.topic(""),
        pipeline: retained("state"),
        metrics: retained("metrics"),
        retained_topics: state.bus.retained_all().len(),
    })
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .with_state(state)
}
