use serde_json::Value;
use tracing::debug;

/// One observable step of a conversation execution.
#[derive(Debug, Clone)]
pub struct ExecutionEvent {
    /// `ai_request`, `ai_reply`, `tool_call`, …
    pub kind: &'static str,
    pub bot_id: String,
    pub session_key: String,
    /// Already-redacted payload — sinks must not see raw traffic for
    /// non-tester clients.
    pub payload: Value,
}

/// Fire-and-forget execution event recording.
pub trait EventSink: Send + Sync {
    fn record(&self, event: ExecutionEvent);
}

/// Default sink: debug-level structured logs.
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn record(&self, event: ExecutionEvent) {
        debug!(
            kind = event.kind,
            bot_id = %event.bot_id,
            session = %event.session_key,
            payload = %event.payload,
            "execution event"
        );
    }
}
