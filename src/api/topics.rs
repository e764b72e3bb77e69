//! Retained topic reads and command submission

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;

use super::ApiState;

/// Retained payload of a topic, full (`hearth/assistant/...`) or assistant-relative
async fn get_topic(State(state): State<Arc<ApiState>>, Path(topic): Path<String>) -> Response {
    let payload = state
        .bus
        .retained(&topic)
        .or_else(|| state.bus.retained(&state.bus.topic(&topic)));

    match payload {
        Some(payload) => ([(header::CONTENT_TYPE, "application/json")], payload).into_response(),
        None => {
            tracing::debug!(topic = %topic, "no retained payload");
            (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "no retained payload", "topic": topic})),
            )
                .into_response()
        }
    }
}

/// Queue a raw command; its effect shows up in the next snapshot
async fn post_command(State(state): State<Arc<ApiState>>, body: String) -> StatusCode {
    if body.trim().is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    match state.commands.send(body).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            tracing::warn!(error = %e, "command queue unavailable");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/topics/{*topic}", get(get_topic))
        .route("/api/schedules/command", post(post_command))
        .with_state(state)
}
