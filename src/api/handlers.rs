// API request handlers

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{Json, Response},
};
use serde::Serialize;
use serde_json::{json, Value};

use super::{ApiError, AppState};
use crate::proxy::translator;

// Root endpoint
pub async fn root() -> Json<Value> {
    Json(json!({
        "message": "Chat Relay Proxy",
        "endpoints": [
            "POST /v1/chat/completions",
            "GET /v1/models"
        ]
    }))
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: &'static str,
    pub owned_by: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub object: &'static str,
    pub data: Vec<ModelInfo>,
}

pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let data = state
        .registry
        .ids()
        .map(|id| ModelInfo {
            id: id.to_string(),
            object: "model",
            owned_by: "upstream",
        })
        .collect();

    Json(ModelsResponse {
        object: "list",
        data,
    })
}

/// Rewrite the request against its model template and stream upstream's reply.
///
/// Errors before the first byte become a JSON error response; once the body
/// stream has started a failure can only cut the stream short.
pub async fn chat_completions(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payload = translator::normalize(&body, &state.registry)?;
    let stream = state.upstream.relay(&payload).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(stream.into_io_stream()))
        .map_err(|e| ApiError::Internal(e.to_string()))
}
