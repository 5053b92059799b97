//! Chatwoot-style webhook ingress — POST /instances/{id}/chatwoot/webhook.
//!
//! Only three events matter: `message_created` (a human agent replied
//! from the dashboard; forward it to the transport) and the two typing
//! events (feed the sticky-typing flag). Everything else is ignored
//! with a 200 so the helpdesk does not retry.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use charla_channels::OutboundMessage;
use charla_sessions::SessionKey;

use crate::app::AppState;

pub async fn chatwoot_webhook(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !state.config.helpdesk.capture_chatwoot_webhooks {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "chatwoot capture is disabled"})),
        );
    }

    let event = payload.get("event").and_then(|v| v.as_str()).unwrap_or("");
    match event {
        "conversation_typing_on" | "conversation_typing_off" => {
            let Some(phone) = derive_phone(&payload) else {
                return ignored("no phone in typing event");
            };
            let key = SessionKey::new(&instance_id, &phone, &phone);
            state
                .processor
                .set_typing(&key, event == "conversation_typing_on");
            debug!(instance = %instance_id, %phone, event, "typing state updated");
            (StatusCode::OK, Json(json!({"ok": true})))
        }

        "message_created" => handle_message_created(&state, &instance_id, &payload).await,

        other => {
            debug!(event = %other, "chatwoot event ignored");
            ignored("event not handled")
        }
    }
}

async fn handle_message_created(
    state: &AppState,
    instance_id: &str,
    payload: &Value,
) -> (StatusCode, Json<Value>) {
    // Only human agent messages travel to the transport: agent senders
    // are `User`, outgoing messages are type 1, and our own mirrored
    // replies carry from_bot=true for loop avoidance.
    let sender_type = payload
        .get("sender_type")
        .or_else(|| payload.get("sender").and_then(|s| s.get("type")))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if sender_type != "User" {
        return ignored("sender is not an agent");
    }
    if payload.get("message_type").and_then(|v| v.as_i64()) != Some(1) {
        return ignored("not an outgoing message");
    }
    if from_bot(payload) {
        return ignored("bot-originated message");
    }

    let Some(phone) = derive_phone(payload) else {
        return ignored("no phone in sender meta");
    };
    let content = payload
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let attachment = payload
        .get("attachments")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first());
    let (media_url, media_kind) = match attachment {
        Some(att) => route_attachment(att),
        None => (None, None),
    };

    if content.is_empty() && media_url.is_none() {
        return ignored("empty message");
    }

    let Some(adapter) = state.processor.channel(instance_id) else {
        warn!(instance = %instance_id, "no adapter for instance");
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "unknown instance"})),
        );
    };

    let outbound = OutboundMessage {
        channel_id: instance_id.to_string(),
        chat_id: phone.clone(),
        text: content,
        media_url,
        media_kind,
    };
    match adapter.send(&outbound).await {
        Ok(()) => {
            info!(instance = %instance_id, %phone, "helpdesk message forwarded");
            (StatusCode::OK, Json(json!({"ok": true})))
        }
        Err(e) => {
            warn!(instance = %instance_id, error = %e, "helpdesk forward failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "transport send failed"})),
            )
        }
    }
}

fn ignored(reason: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({"ignored": true, "reason": reason})))
}

/// Phone derivation: `meta.sender.phone_number` else `meta.sender.identifier`.
pub fn derive_phone(payload: &Value) -> Option<String> {
    let sender = payload
        .get("meta")
        .and_then(|m| m.get("sender"))
        .or_else(|| payload.get("sender"))?;
    let phone = sender
        .get("phone_number")
        .and_then(|v| v.as_str())
        .filter(|p| !p.is_empty())
        .or_else(|| sender.get("identifier").and_then(|v| v.as_str()))?;
    Some(phone.trim_start_matches('+').to_string())
}

fn from_bot(payload: &Value) -> bool {
    payload
        .get("content_attributes")
        .and_then(|a| a.get("from_bot"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Attachments route by `file_type`; unknown kinds fall back to text
/// (the URL is still delivered, just without a media hint).
pub fn route_attachment(attachment: &Value) -> (Option<String>, Option<String>) {
    let url = attachment
        .get("data_url")
        .and_then(|v| v.as_str())
        .map(String::from);
    let kind = attachment
        .get("file_type")
        .and_then(|v| v.as_str())
        .filter(|t| matches!(*t, "image" | "audio" | "video"))
        .map(String::from);
    (url, kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_prefers_phone_number_over_identifier() {
        let payload = json!({
            "meta": { "sender": {
                "phone_number": "+5491155551234",
                "identifier": "5491155551234@s.net"
            }}
        });
        assert_eq!(derive_phone(&payload).as_deref(), Some("5491155551234"));

        let fallback = json!({
            "meta": { "sender": { "identifier": "549115555@s.net" } }
        });
        assert_eq!(derive_phone(&fallback).as_deref(), Some("549115555@s.net"));

        assert_eq!(derive_phone(&json!({})), None);
    }

    #[test]
    fn attachment_routing_by_file_type() {
        for kind in ["image", "audio", "video"] {
            let att = json!({"file_type": kind, "data_url": "https://cdn/x"});
            let (url, routed) = route_attachment(&att);
            assert_eq!(url.as_deref(), Some("https://cdn/x"));
            assert_eq!(routed.as_deref(), Some(kind));
        }

        // Other types fall back to text delivery.
        let att = json!({"file_type": "file", "data_url": "https://cdn/doc.pdf"});
        let (url, routed) = route_attachment(&att);
        assert_eq!(url.as_deref(), Some("https://cdn/doc.pdf"));
        assert!(routed.is_none());
    }

    #[test]
    fn from_bot_flag_detection() {
        assert!(from_bot(&json!({
            "content_attributes": {"from_bot": true}
        })));
        assert!(!from_bot(&json!({"content_attributes": {}})));
        assert!(!from_bot(&json!({})));
    }
}
