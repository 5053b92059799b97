//! Event redaction for non-tester clients.
//!
//! Tool traffic can carry PII. Unless the resolved client is marked
//! tester, argument and result payloads in execution events collapse to
//! a placeholder; only a small whitelist of operational keys survives,
//! and only for native tools. Prompt and user input collapse entirely.

use serde_json::{json, Value};

/// Operational keys that remain visible on native tool payloads.
const WHITELIST: [&str; 5] = ["time", "date", "duration", "quantity", "status"];

pub const REDACTED_TEXT: &str = "[REDACTED]";

/// Redact a tool payload for event recording.
///
/// Native tools keep whitelisted top-level keys; everything else (and
/// all MCP traffic) becomes `{"_redacted":"…"}`.
pub fn redact_tool_payload(payload: &Value, is_native: bool) -> Value {
    if !is_native {
        return json!({"_redacted": "..."});
    }
    let Some(map) = payload.as_object() else {
        return json!({"_redacted": "..."});
    };

    let kept: serde_json::Map<String, Value> = map
        .iter()
        .filter(|(k, _)| WHITELIST.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if kept.is_empty() {
        json!({"_redacted": "..."})
    } else {
        let mut out = kept;
        out.insert("_redacted".to_string(), json!("..."));
        Value::Object(out)
    }
}

/// Redact free text (system prompt, user input) for event recording.
pub fn redact_text(text: &str, tester: bool) -> String {
    if tester {
        text.to_string()
    } else {
        REDACTED_TEXT.to_string()
    }
}
