//! MCP wire transports: streamable HTTP and HTTP+SSE.
//!
//! Both speak JSON-RPC 2.0. Streamable HTTP POSTs every request to one
//! endpoint and reads either a JSON body or a one-shot SSE body. The
//! SSE flavour keeps a long-lived GET stream open; the server announces
//! a POST endpoint in the first `endpoint` event and replies arrive on
//! the stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{McpError, Result};

pub const PROTOCOL_VERSION: &str = "2025-06-18";
const SESSION_HEADER: &str = "mcp-session-id";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub enum McpTransport {
    Http(HttpTransport),
    Sse(SseTransport),
}

impl McpTransport {
    /// Issue one JSON-RPC request. `extra_headers` are merged over the
    /// connection's base headers for this call only.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        extra_headers: &HashMap<String, String>,
    ) -> Result<Value> {
        match self {
            McpTransport::Http(t) => t.request(method, params, extra_headers).await,
            McpTransport::Sse(t) => t.request(method, params, extra_headers).await,
        }
    }

    /// Fire a JSON-RPC notification (no id, no response expected).
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        match self {
            McpTransport::Http(t) => t.notify(method, params).await,
            McpTransport::Sse(t) => t.notify(method, params).await,
        }
    }

    pub fn close(&self) {
        if let McpTransport::Sse(t) = self {
            t.close();
        }
    }
}

fn build_headers(
    base: &HashMap<String, String>,
    extra: &HashMap<String, String>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in base.iter().chain(extra.iter()) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(n), Ok(v)) => {
                headers.insert(n, v);
            }
            _ => warn!(header = %name, "skipping invalid header"),
        }
    }
    headers
}

/// Split a JSON-RPC envelope into its result, classifying errors.
fn unwrap_rpc(envelope: Value) -> Result<Value> {
    if let Some(err) = envelope.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string();
        let retryable_session = message.to_lowercase().contains("session");
        return Err(McpError::Server {
            message,
            retryable_session,
        });
    }
    envelope
        .get("result")
        .cloned()
        .ok_or_else(|| McpError::Protocol("response has neither result nor error".to_string()))
}

// ── Streamable HTTP ──────────────────────────────────────────────────────────

pub struct HttpTransport {
    http: reqwest::Client,
    url: String,
    base_headers: HashMap<String, String>,
    session_id: Mutex<Option<String>>,
    next_id: AtomicI64,
}

impl HttpTransport {
    pub fn new(http: reqwest::Client, url: String, base_headers: HashMap<String, String>) -> Self {
        Self {
            http,
            url,
            base_headers,
            session_id: Mutex::new(None),
            next_id: AtomicI64::new(1),
        }
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        extra_headers: &HashMap<String, String>,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let mut headers = build_headers(&self.base_headers, extra_headers);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/event-stream"));
        headers.insert(
            HeaderName::from_static("mcp-protocol-version"),
            HeaderValue::from_static(PROTOCOL_VERSION),
        );
        if let Some(session) = self.session_id.lock().unwrap().clone() {
            if let Ok(v) = HeaderValue::from_str(&session) {
                headers.insert(HeaderName::from_static(SESSION_HEADER), v);
            }
        }

        debug!(%method, id, "mcp http request");
        let response = self
            .http
            .post(&self.url)
            .headers(headers)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        // The server assigns the session on initialize; remember it.
        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().unwrap() = Some(session.to_string());
        }

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let text = response.text().await?;

        if !status.is_success() {
            let retryable_session = status.as_u16() == 404 || text.to_lowercase().contains("session");
            return Err(McpError::Server {
                message: format!("HTTP {status}: {text}"),
                retryable_session,
            });
        }

        let envelope = if content_type.starts_with("text/event-stream") {
            first_matching_event(&text, id)?
        } else {
            serde_json::from_str(&text)?
        };
        unwrap_rpc(envelope)
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let body = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        let mut headers = build_headers(&self.base_headers, &HashMap::new());
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/event-stream"));
        if let Some(session) = self.session_id.lock().unwrap().clone() {
            if let Ok(v) = HeaderValue::from_str(&session) {
                headers.insert(HeaderName::from_static(SESSION_HEADER), v);
            }
        }
        self.http
            .post(&self.url)
            .headers(headers)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Ok(())
    }
}

/// Scan a one-shot SSE body for the data frame answering `id`.
fn first_matching_event(body: &str, id: i64) -> Result<Value> {
    for line in body.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        if let Ok(value) = serde_json::from_str::<Value>(data.trim()) {
            if value.get("id").and_then(|v| v.as_i64()) == Some(id) {
                return Ok(value);
            }
        }
    }
    Err(McpError::Protocol(format!(
        "no SSE data frame answered request {id}"
    )))
}

// ── HTTP + SSE ───────────────────────────────────────────────────────────────

/// Incremental SSE decoder. Fed raw chunks, yields complete events.
#[derive(Default)]
struct SseDecoder {
    buffer: String,
}

struct SseEvent {
    event: String,
    data: String,
}

impl SseDecoder {
    fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        // Events are separated by a blank line.
        while let Some(pos) = self.buffer.find("\n\n") {
            let raw: String = self.buffer.drain(..pos + 2).collect();
            let mut event = String::from("message");
            let mut data = String::new();
            for line in raw.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    event = v.trim().to_string();
                } else if let Some(v) = line.strip_prefix("data:") {
                    if !data.is_empty() {
                        data.push('\n');
                    }
                    data.push_str(v.trim());
                }
            }
            if !data.is_empty() {
                events.push(SseEvent { event, data });
            }
        }
        events
    }
}

pub struct SseTransport {
    http: reqwest::Client,
    /// POST endpoint announced by the server's `endpoint` event.
    endpoint: String,
    base_headers: HashMap<String, String>,
    pending: Arc<DashMap<i64, oneshot::Sender<Value>>>,
    next_id: AtomicI64,
    reader: tokio::task::JoinHandle<()>,
}

impl SseTransport {
    /// Open the event stream and wait for the endpoint announcement.
    pub async fn connect(
        http: reqwest::Client,
        url: String,
        base_headers: HashMap<String, String>,
    ) -> Result<Self> {
        let mut headers = build_headers(&base_headers, &HashMap::new());
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        let response = http.get(&url).headers(headers).send().await?;
        if !response.status().is_success() {
            return Err(McpError::Protocol(format!(
                "SSE stream refused: HTTP {}",
                response.status()
            )));
        }

        let pending: Arc<DashMap<i64, oneshot::Sender<Value>>> = Arc::new(DashMap::new());
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

        let reader = tokio::spawn(read_stream(response, pending.clone(), endpoint_tx));

        let endpoint_path = tokio::time::timeout(REQUEST_TIMEOUT, endpoint_rx)
            .await
            .map_err(|_| McpError::Protocol("endpoint event not received".to_string()))?
            .map_err(|_| McpError::ConnectionClosed("stream ended before endpoint".to_string()))?;

        let endpoint = resolve_endpoint(&url, &endpoint_path)?;
        debug!(%endpoint, "sse transport connected");

        Ok(Self {
            http,
            endpoint,
            base_headers,
            pending,
            next_id: AtomicI64::new(1),
            reader,
        })
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        extra_headers: &HashMap<String, String>,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let headers = build_headers(&self.base_headers, extra_headers);

        debug!(%method, id, "mcp sse request");
        let post = self
            .http
            .post(&self.endpoint)
            .headers(headers)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await;

        if let Err(e) = post {
            self.pending.remove(&id);
            return Err(e.into());
        }

        let envelope = tokio::time::timeout(REQUEST_TIMEOUT, rx)
            .await
            .map_err(|_| {
                self.pending.remove(&id);
                McpError::Protocol(format!("request {id} timed out"))
            })?
            .map_err(|_| McpError::ConnectionClosed("stream closed mid-request".to_string()))?;
        unwrap_rpc(envelope)
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let body = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        let headers = build_headers(&self.base_headers, &HashMap::new());
        self.http
            .post(&self.endpoint)
            .headers(headers)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Ok(())
    }

    pub fn close(&self) {
        self.reader.abort();
    }
}

async fn read_stream(
    response: reqwest::Response,
    pending: Arc<DashMap<i64, oneshot::Sender<Value>>>,
    endpoint_tx: oneshot::Sender<String>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut decoder = SseDecoder::default();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let Ok(bytes) = chunk else { break };
        let text = String::from_utf8_lossy(&bytes);
        for event in decoder.feed(&text) {
            match event.event.as_str() {
                "endpoint" => {
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(event.data);
                    }
                }
                _ => {
                    let Ok(value) = serde_json::from_str::<Value>(&event.data) else {
                        continue;
                    };
                    if let Some(id) = value.get("id").and_then(|v| v.as_i64()) {
                        if let Some((_, tx)) = pending.remove(&id) {
                            let _ = tx.send(value);
                        }
                    }
                }
            }
        }
    }
    debug!("sse stream ended");
}

/// The endpoint event carries either an absolute URL or a path relative
/// to the stream URL's origin.
fn resolve_endpoint(stream_url: &str, endpoint: &str) -> Result<String> {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return Ok(endpoint.to_string());
    }
    let base = reqwest::Url::parse(stream_url)
        .map_err(|e| McpError::Protocol(format!("bad stream url: {e}")))?;
    base.join(endpoint)
        .map(|u| u.to_string())
        .map_err(|e| McpError::Protocol(format!("bad endpoint path: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed("event: endpoint\nda").is_empty());
        let events = decoder.feed("ta: /messages?id=7\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "endpoint");
        assert_eq!(events[0].data, "/messages?id=7");
    }

    #[test]
    fn sse_decoder_multiple_events() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(
            "event: message\ndata: {\"id\":1}\n\nevent: message\ndata: {\"id\":2}\n\n",
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].data, "{\"id\":2}");
    }

    #[test]
    fn endpoint_resolution() {
        assert_eq!(
            resolve_endpoint("https://tools.example/sse", "/messages?s=1").unwrap(),
            "https://tools.example/messages?s=1"
        );
        assert_eq!(
            resolve_endpoint("https://tools.example/sse", "https://other.example/m").unwrap(),
            "https://other.example/m"
        );
    }

    #[test]
    fn rpc_error_classification() {
        let err = unwrap_rpc(json!({
            "jsonrpc": "2.0", "id": 1,
            "error": {"code": -32000, "message": "Session expired"}
        }))
        .unwrap_err();
        assert!(err.is_session_class());

        let err = unwrap_rpc(json!({
            "jsonrpc": "2.0", "id": 1,
            "error": {"code": -32601, "message": "Method not found"}
        }))
        .unwrap_err();
        assert!(!err.is_session_class());
    }

    #[test]
    fn one_shot_sse_body_matching() {
        let body = "data: {\"id\":9,\"result\":{}}\n\ndata: {\"id\":10,\"result\":{\"ok\":true}}\n\n";
        let value = first_matching_event(body, 10).unwrap();
        assert_eq!(value["result"]["ok"], serde_json::json!(true));
        assert!(first_matching_event(body, 11).is_err());
    }
}
