//! The MCP gateway: pooled connections, per-bot header injection,
//! health reporting.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use charla_bots::{BotMcpConfig, BotRepository, McpServer, McpTransportKind};

use crate::client::McpClient;
use crate::error::{McpError, Result};
use crate::health::HealthSink;
use crate::types::{ToolCallResult, ToolDescriptor};

/// Close connections unused for this long.
const IDLE_LIMIT_SECS: i64 = 600;
/// Cadence of the idle sweeper.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Reachability probe budget.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct McpGateway {
    repo: Arc<BotRepository>,
    health: Arc<dyn HealthSink>,
    http: reqwest::Client,
    allow_insecure_http: bool,
    /// One lazily-established client per server id.
    clients: DashMap<String, Arc<McpClient>>,
}

impl McpGateway {
    pub fn new(
        repo: Arc<BotRepository>,
        health: Arc<dyn HealthSink>,
        allow_insecure_http: bool,
    ) -> Self {
        Self {
            repo,
            health,
            http: reqwest::Client::new(),
            allow_insecure_http,
            clients: DashMap::new(),
        }
    }

    /// Spawn the idle sweeper; returns its handle so shutdown can abort it.
    pub fn spawn_idle_sweeper(gateway: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                gateway.sweep_idle();
            }
        })
    }

    /// Close and drop every client idle for more than 10 minutes.
    pub fn sweep_idle(&self) -> usize {
        let stale: Vec<String> = self
            .clients
            .iter()
            .filter(|entry| entry.value().idle_secs() > IDLE_LIMIT_SECS)
            .map(|entry| entry.key().clone())
            .collect();
        for server_id in &stale {
            if let Some((_, client)) = self.clients.remove(server_id) {
                client.close();
                info!(server_id = %server_id, "closed idle mcp connection");
            }
        }
        stale.len()
    }

    /// Validate a server record.
    ///
    /// Always runs the cheap reachability probe; with `full_handshake`
    /// it also opens the protocol transport, initializes and lists
    /// tools, returning them. Every outcome is reported to the health
    /// sink keyed by the server id.
    #[instrument(skip(self, server), fields(server_id = %server.id))]
    pub async fn validate(
        &self,
        server: &McpServer,
        full_handshake: bool,
    ) -> Result<Vec<ToolDescriptor>> {
        let outcome = self.validate_inner(server, full_handshake).await;
        match &outcome {
            Ok(tools) => {
                self.health.report("MCP", &server.id, true, None);
                debug!(tools = tools.len(), "server validated");
            }
            Err(e) => self.health.report("MCP", &server.id, false, Some(&e.to_string())),
        }
        outcome
    }

    async fn validate_inner(
        &self,
        server: &McpServer,
        full_handshake: bool,
    ) -> Result<Vec<ToolDescriptor>> {
        server
            .validate(self.allow_insecure_http)
            .map_err(|e| McpError::Validation(e.to_string()))?;
        if server.kind == McpTransportKind::Stdio {
            return Err(McpError::Validation(format!(
                "server {} is stdio; the network gateway only speaks sse/http",
                server.id
            )));
        }

        self.probe(&server.url).await?;
        if !full_handshake {
            return Ok(Vec::new());
        }

        let client = McpClient::connect(self.http.clone(), server).await?;
        let tools = client.cached_tools();
        let names: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();
        if let Err(e) = self.repo.update_tools_cache(&server.id, &names) {
            warn!(server_id = %server.id, error = %e, "tools cache update failed");
        }
        // Keep the fresh connection — the next call reuses it.
        self.clients.insert(server.id.clone(), Arc::new(client));
        Ok(tools)
    }

    /// Cheap reachability check: GET, 5 s, any 2xx.
    async fn probe(&self, url: &str) -> Result<()> {
        let response = self
            .http
            .get(url)
            .timeout(PROBE_TIMEOUT)
            .header("Accept", "text/event-stream, application/json")
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(McpError::Protocol(format!(
                "probe returned HTTP {}",
                response.status()
            )))
        }
    }

    /// Tools currently exposed by a server (connecting lazily).
    pub async fn list_tools(&self, server_id: &str) -> Result<Vec<ToolDescriptor>> {
        let server = self.repo.get_server(server_id)?;
        let client = self.get_or_connect(&server).await?;
        Ok(client.cached_tools())
    }

    /// Call a tool on behalf of a bot.
    ///
    /// The bot's per-server custom headers are decrypted by the
    /// repository and merged into a per-call copy over the server's own
    /// headers — the shared server record is never mutated.
    #[instrument(skip(self, arguments))]
    pub async fn call_tool(
        &self,
        bot_id: &str,
        server_id: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolCallResult> {
        let server = self.repo.get_server(server_id)?;
        let call_headers = self.merged_headers(bot_id, &server)?;

        let client = self.get_or_connect(&server).await?;
        let outcome = client.call_tool(tool, arguments, &call_headers).await;

        match &outcome {
            Ok(result) if !result.is_error => {
                self.health.report("MCP", server_id, true, None);
            }
            Ok(result) => {
                self.health
                    .report("MCP", server_id, false, Some(&result.content));
            }
            Err(e) => {
                // Report, but the error is also returned to the caller.
                self.health.report("MCP", server_id, false, Some(&e.to_string()));
            }
        }
        outcome
    }

    /// Union of the bot's enabled servers' tools, minus its disabled set.
    pub async fn get_bot_tools(&self, bot_id: &str) -> Result<Vec<ToolDescriptor>> {
        let mut tools = Vec::new();
        let mut seen = HashSet::new();

        for server_id in self.repo.enabled_server_ids(bot_id)? {
            let disabled: HashSet<String> = self
                .repo
                .get_bot_config(bot_id, &server_id)?
                .map(|c| c.disabled_tools.into_iter().collect())
                .unwrap_or_default();

            let server = self.repo.get_server(&server_id)?;
            let server_tools = match self.get_or_connect(&server).await {
                Ok(client) => client.cached_tools(),
                Err(e) => {
                    // Fall back to the persisted cache so one dead server
                    // doesn't hide the rest of the bot's tools.
                    warn!(server_id = %server_id, error = %e, "using persisted tools cache");
                    server
                        .tools_cache
                        .iter()
                        .map(|name| ToolDescriptor {
                            name: name.clone(),
                            description: String::new(),
                            input_schema: Value::Null,
                        })
                        .collect()
                }
            };

            for tool in server_tools {
                if !disabled.contains(&tool.name) && seen.insert(tool.name.clone()) {
                    tools.push(tool);
                }
            }
        }
        Ok(tools)
    }

    /// Map a tool name to the serving server id for a bot, if any.
    pub fn server_for_tool(&self, bot_id: &str, tool: &str) -> Result<Option<String>> {
        for server_id in self.repo.enabled_server_ids(bot_id)? {
            let disabled = self
                .repo
                .get_bot_config(bot_id, &server_id)?
                .map(|c| c.disabled_tools)
                .unwrap_or_default();
            if disabled.iter().any(|t| t == tool) {
                continue;
            }

            // Prefer the live connection's view; fall back to the cache.
            let names: Vec<String> = match self.clients.get(&server_id) {
                Some(client) => client.cached_tools().into_iter().map(|t| t.name).collect(),
                None => self.repo.get_server(&server_id)?.tools_cache,
            };
            if names.iter().any(|n| n == tool) {
                return Ok(Some(server_id));
            }
        }
        Ok(None)
    }

    /// Persist a bot-MCP config, revalidating the server with the
    /// merged headers first.
    ///
    /// Revalidation is skipped iff the config was already enabled and
    /// the decrypted custom headers are unchanged — flipping other
    /// fields (disabled tools, instructions) costs nothing.
    pub async fn save_bot_config(&self, config: &BotMcpConfig) -> Result<()> {
        let existing = self.repo.get_bot_config(&config.bot_id, &config.server_id)?;
        let unchanged = existing
            .as_ref()
            .map(|e| e.enabled && e.custom_headers == config.custom_headers)
            .unwrap_or(false);

        if config.enabled && !unchanged {
            let mut server = self.repo.get_server(&config.server_id)?;
            // Validate with the merged view the calls will actually use.
            let mut merged = server.headers.clone().unwrap_or_default();
            if let Some(custom) = &config.custom_headers {
                merged.extend(custom.clone());
            }
            server.headers = Some(merged);
            self.validate(&server, true).await?;
        } else {
            debug!(bot_id = %config.bot_id, server_id = %config.server_id,
                "config unchanged, skipping revalidation");
        }

        self.repo.save_bot_config(config)?;
        Ok(())
    }

    /// Close every connection. New calls reconnect lazily.
    pub fn shutdown(&self) {
        for entry in self.clients.iter() {
            entry.value().close();
        }
        self.clients.clear();
        info!("mcp gateway shut down");
    }

    fn merged_headers(
        &self,
        bot_id: &str,
        server: &McpServer,
    ) -> Result<HashMap<String, String>> {
        let mut headers = server.headers.clone().unwrap_or_default();
        if let Some(config) = self.repo.get_bot_config(bot_id, &server.id)? {
            if let Some(custom) = config.custom_headers {
                headers.extend(custom);
            }
        }
        Ok(headers)
    }

    /// Reuse the pooled client unless the stored config drifted from
    /// the connection's snapshot, in which case reconnect.
    async fn get_or_connect(&self, server: &McpServer) -> Result<Arc<McpClient>> {
        if let Some(entry) = self.clients.get(&server.id) {
            let client = entry.value().clone();
            drop(entry);
            if client.matches(server) {
                client.touch();
                return Ok(client);
            }
            if let Some((_, stale)) = self.clients.remove(&server.id) {
                info!(server_id = %server.id, "server config changed, reconnecting");
                stale.close();
            }
        }

        let client = Arc::new(McpClient::connect(self.http.clone(), server).await?);
        self.clients.insert(server.id.clone(), client.clone());
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use charla_core::SecretBox;
    use rusqlite::Connection;

    use super::*;

    struct RecordingSink {
        reports: Mutex<Vec<(String, bool)>>,
    }

    impl HealthSink for RecordingSink {
        fn report(&self, _entity: &'static str, id: &str, healthy: bool, _detail: Option<&str>) {
            self.reports.lock().unwrap().push((id.to_string(), healthy));
        }
    }

    fn gateway(allow_insecure: bool) -> (Arc<McpGateway>, Arc<RecordingSink>) {
        let repo = Arc::new(
            BotRepository::new(
                Connection::open_in_memory().unwrap(),
                Arc::new(SecretBox::new("k")),
            )
            .unwrap(),
        );
        let sink = Arc::new(RecordingSink {
            reports: Mutex::new(Vec::new()),
        });
        (
            Arc::new(McpGateway::new(repo, sink.clone(), allow_insecure)),
            sink,
        )
    }

    fn sse_server(url: &str) -> McpServer {
        McpServer {
            id: "srv-1".into(),
            name: "tools".into(),
            kind: McpTransportKind::Sse,
            url: url.into(),
            headers: None,
            tools_cache: vec![],
            is_template: false,
            required_headers: vec![],
            instructions: None,
            updated_at: String::new(),
        }
    }

    #[tokio::test]
    async fn insecure_sse_is_rejected_before_any_network() {
        let (gateway, sink) = gateway(false);
        let err = gateway
            .validate(&sse_server("http://insecure.example/sse"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Validation(_)));
        // The failure is still health-reported.
        assert_eq!(
            *sink.reports.lock().unwrap(),
            vec![("srv-1".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn insecure_flag_lets_http_sse_through_validation() {
        let (gateway, _) = gateway(true);
        // Passes the URL check, then fails at the probe (no server) —
        // which proves the validation gate itself opened.
        let err = gateway
            .validate(&sse_server("http://127.0.0.1:9/sse"), false)
            .await
            .unwrap_err();
        assert!(!matches!(err, McpError::Validation(_)));
    }

    #[tokio::test]
    async fn per_bot_headers_merge_without_touching_the_server_record() {
        let (gateway, _) = gateway(true);
        let mut server = sse_server("https://tools.example/sse");
        let mut base = std::collections::HashMap::new();
        base.insert("X-Workspace".to_string(), "acme".to_string());
        server.headers = Some(base.clone());
        gateway.repo.save_server(&server, true).unwrap();

        for (bot, token) in [("bot-x", "Bearer X"), ("bot-y", "Bearer Y")] {
            let mut custom = std::collections::HashMap::new();
            custom.insert("Authorization".to_string(), token.to_string());
            gateway
                .repo
                .save_bot_config(&charla_bots::BotMcpConfig {
                    bot_id: bot.into(),
                    server_id: "srv-1".into(),
                    enabled: true,
                    disabled_tools: vec![],
                    custom_headers: Some(custom),
                    instructions: None,
                })
                .unwrap();
        }

        let stored = gateway.repo.get_server("srv-1").unwrap();
        let x = gateway.merged_headers("bot-x", &stored).unwrap();
        let y = gateway.merged_headers("bot-y", &stored).unwrap();
        assert_eq!(x.get("Authorization").map(String::as_str), Some("Bearer X"));
        assert_eq!(y.get("Authorization").map(String::as_str), Some("Bearer Y"));
        assert_eq!(x.get("X-Workspace").map(String::as_str), Some("acme"));

        // The shared record keeps only its own headers.
        let after = gateway.repo.get_server("srv-1").unwrap();
        assert_eq!(after.headers, Some(base));
    }

    #[tokio::test]
    async fn stdio_servers_are_rejected() {
        let (gateway, _) = gateway(true);
        let mut server = sse_server("https://x.example/sse");
        server.kind = McpTransportKind::Stdio;
        let err = gateway.validate(&server, false).await.unwrap_err();
        assert!(matches!(err, McpError::Validation(_)));
    }
}
