//! Bot-webhook HTTP endpoint — POST /bots/{id}/webhook.
//!
//! Synchronous chat surface: the request is admitted through the
//! webhook worker pool (full queue → 429) and the reply travels back in
//! the success envelope.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::warn;

use charla_core::CharlaError;
use charla_pool::Job;

use crate::app::AppState;

#[derive(Deserialize)]
pub struct WebhookRequest {
    pub memory_id: String,
    pub input: String,
}

pub async fn bot_webhook(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<String>,
    Json(request): Json<WebhookRequest>,
) -> (StatusCode, Json<Value>) {
    let Some(pool) = &state.webhook_pool else {
        return envelope(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "bot webhook pool not initialized",
            None,
        );
    };

    let input = request.input.trim().to_string();
    let memory_id = request.memory_id.clone();

    let (reply_tx, reply_rx) = oneshot::channel();
    let processor = state.processor.clone();
    let job_bot_id = bot_id.clone();
    let job_memory_id = memory_id.clone();
    let job_input = input.clone();

    let job = Job::new(bot_id.clone(), memory_id.clone(), async move {
        let outcome = processor
            .process_webhook(&job_bot_id, &job_memory_id, &job_input)
            .await;
        let _ = reply_tx.send(outcome);
        Ok(())
    });

    if pool.try_dispatch(job).is_err() {
        return envelope(
            StatusCode::TOO_MANY_REQUESTS,
            "TOO_MANY_REQUESTS",
            "webhook queue is full, retry later",
            None,
        );
    }

    match reply_rx.await {
        Ok(Ok(reply)) => envelope(
            StatusCode::OK,
            "SUCCESS",
            "processed",
            Some(json!({
                "bot_id": bot_id,
                "memory_id": memory_id,
                "input": input,
                "reply": reply,
            })),
        ),
        Ok(Err(e)) => error_envelope(e),
        Err(_) => envelope(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "handler dropped before replying",
            None,
        ),
    }
}

fn envelope(
    status: StatusCode,
    code: &str,
    message: &str,
    results: Option<Value>,
) -> (StatusCode, Json<Value>) {
    let mut body = json!({
        "status": status.as_u16(),
        "code": code,
        "message": message,
    });
    if let Some(results) = results {
        body["results"] = results;
    }
    (status, Json(body))
}

fn error_envelope(error: CharlaError) -> (StatusCode, Json<Value>) {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    // 500-class detail stays in the logs, never in the response body.
    let message = if status.is_server_error() {
        warn!(error = %error, "webhook processing failed");
        "internal error".to_string()
    } else {
        error.to_string()
    };
    envelope(status, error.code(), &message, None)
}
