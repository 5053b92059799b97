use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use charla_bots::{McpServer, McpTransportKind};

use crate::error::{McpError, Result};
use crate::transport::{HttpTransport, McpTransport, SseTransport, PROTOCOL_VERSION};
use crate::types::{ToolCallResult, ToolDescriptor};

/// Initialize retry policy for session-class failures.
const INIT_ATTEMPTS: u32 = 5;
const INIT_BACKOFF: Duration = Duration::from_millis(500);

/// One live connection to an MCP server.
///
/// Owned exclusively by the gateway's client map. The snapshot of the
/// server config it was built from decides when a reconnect is needed.
pub struct McpClient {
    pub server_id: String,
    snapshot_url: String,
    snapshot_headers: HashMap<String, String>,
    transport: McpTransport,
    tools: std::sync::Mutex<Vec<ToolDescriptor>>,
    /// Unix seconds of the last use; the idle sweeper reaps stale entries.
    last_used: AtomicI64,
}

impl McpClient {
    /// Open the protocol transport, run `initialize` (retrying
    /// session-class failures), and list tools.
    pub async fn connect(http: reqwest::Client, server: &McpServer) -> Result<Self> {
        let headers = server.headers.clone().unwrap_or_default();
        let transport = match server.kind {
            McpTransportKind::Http => McpTransport::Http(HttpTransport::new(
                http,
                server.url.clone(),
                headers.clone(),
            )),
            McpTransportKind::Sse => McpTransport::Sse(
                SseTransport::connect(http, server.url.clone(), headers.clone()).await?,
            ),
            McpTransportKind::Stdio => {
                return Err(McpError::Validation(format!(
                    "server {} is stdio; the network gateway only speaks sse/http",
                    server.id
                )))
            }
        };

        let client = Self {
            server_id: server.id.clone(),
            snapshot_url: server.url.clone(),
            snapshot_headers: headers,
            transport,
            tools: std::sync::Mutex::new(Vec::new()),
            last_used: AtomicI64::new(now_unix()),
        };

        client.initialize().await?;
        let tools = client.refresh_tools().await?;
        info!(server_id = %client.server_id, tools = tools.len(), "mcp client connected");
        Ok(client)
    }

    async fn initialize(&self) -> Result<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "charla", "version": env!("CARGO_PKG_VERSION") }
        });

        let mut last_err = None;
        for attempt in 1..=INIT_ATTEMPTS {
            match self
                .transport
                .request("initialize", params.clone(), &HashMap::new())
                .await
            {
                Ok(_) => {
                    // Servers that ignore the initialized notification are
                    // tolerated.
                    let _ = self
                        .transport
                        .notify("notifications/initialized", json!({}))
                        .await;
                    return Ok(());
                }
                Err(e) if e.is_session_class() && attempt < INIT_ATTEMPTS => {
                    warn!(server_id = %self.server_id, attempt, error = %e,
                        "initialize hit session error, backing off");
                    tokio::time::sleep(INIT_BACKOFF).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| McpError::Protocol("initialize failed".to_string())))
    }

    /// `tools/list`, refreshing the in-memory cache.
    pub async fn refresh_tools(&self) -> Result<Vec<ToolDescriptor>> {
        self.touch();
        let result = self
            .transport
            .request("tools/list", json!({}), &HashMap::new())
            .await?;
        let tools: Vec<ToolDescriptor> = serde_json::from_value(
            result.get("tools").cloned().unwrap_or(serde_json::Value::Null),
        )
        .map_err(|e| McpError::Protocol(format!("malformed tools/list: {e}")))?;
        *self.tools.lock().unwrap() = tools.clone();
        Ok(tools)
    }

    pub fn cached_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.lock().unwrap().clone()
    }

    /// `tools/call` with per-call header overrides (the bot's custom
    /// headers merged by the gateway — the connection's own headers are
    /// never mutated).
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        call_headers: &HashMap<String, String>,
    ) -> Result<ToolCallResult> {
        self.touch();
        debug!(server_id = %self.server_id, tool = %name, "mcp tool call");
        let result = self
            .transport
            .request(
                "tools/call",
                json!({ "name": name, "arguments": arguments }),
                call_headers,
            )
            .await?;
        Ok(ToolCallResult::from_frame(result))
    }

    /// Whether this connection still matches the stored server config.
    pub fn matches(&self, server: &McpServer) -> bool {
        self.snapshot_url == server.url
            && &self.snapshot_headers == server.headers.as_ref().unwrap_or(&HashMap::new())
    }

    pub fn touch(&self) {
        self.last_used.store(now_unix(), Ordering::Relaxed);
    }

    pub fn idle_secs(&self) -> i64 {
        now_unix() - self.last_used.load(Ordering::Relaxed)
    }

    pub fn close(&self) {
        self.transport.close();
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
