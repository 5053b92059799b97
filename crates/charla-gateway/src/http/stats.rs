//! Worker-pool stats endpoints.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::app::{AppState, MESSAGE_POOL, WEBHOOK_POOL};

pub async fn worker_pool_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    pool_stats(&state, MESSAGE_POOL)
}

pub async fn webhook_pool_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    pool_stats(&state, WEBHOOK_POOL)
}

fn pool_stats(
    state: &AppState,
    name: &str,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.monitor.stats(name) {
        Some(stats) => Ok(Json(
            serde_json::to_value(stats).unwrap_or_else(|_| json!({})),
        )),
        None => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": format!("pool '{name}' not initialized") })),
        )),
    }
}
