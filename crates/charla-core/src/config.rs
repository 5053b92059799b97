use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Engine-wide timing constants. Session timers derive from these; the
// configurable knobs below only shift the debounce and read windows.
pub const SESSION_TTL_SECS: u64 = 240; // 4 min sliding expiry
pub const INACTIVITY_WARNING_SECS: u64 = 180; // 3 min warning before expiry
pub const STORE_SWEEP_SECS: u64 = 600; // in-memory store eviction cadence
pub const MCP_IDLE_SWEEP_SECS: u64 = 600; // close MCP clients idle > 10 min
pub const MCP_PROBE_TIMEOUT_SECS: u64 = 5;

/// Top-level config (charla.toml + CHARLA_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharlaConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub pools: PoolsConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub helpdesk: HelpdeskConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

impl Default for CharlaConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            engine: EngineConfig::default(),
            providers: ProvidersConfig::default(),
            pools: PoolsConfig::default(),
            mcp: McpConfig::default(),
            helpdesk: HelpdeskConfig::default(),
            database: DatabaseConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Conversation-engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base debounce window in milliseconds before a burst is flushed.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// How long a contact may stay idle before the inactivity warning
    /// path considers them gone (milliseconds).
    #[serde(default = "default_wait_idle_ms")]
    pub wait_contact_idle_ms: u64,
    /// Window after a reply during which unread messages are marked
    /// read immediately (seconds).
    #[serde(default = "default_read_window")]
    pub immediate_read_window_secs: u64,
    /// Whether outbound replies go through the typing simulation.
    #[serde(default = "bool_true")]
    pub typing_enabled: bool,
    /// Prepended to every bot's own system prompt.
    #[serde(default)]
    pub global_system_prompt: String,
    /// Fallback timezone offset when neither client nor channel has one
    /// (e.g. "UTC", "+02:00", "-05:30").
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Conversation history cap in turns. -1 means unbounded.
    #[serde(default = "default_max_history")]
    pub max_history: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            wait_contact_idle_ms: default_wait_idle_ms(),
            immediate_read_window_secs: default_read_window(),
            typing_enabled: true,
            global_system_prompt: String::new(),
            timezone: default_timezone(),
            max_history: default_max_history(),
        }
    }
}

/// Global AI provider keys — the last two rungs of the api-key fallback
/// (bot key → credential → provider-specific → generic).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub claude_api_key: Option<String>,
    /// Generic fallback key used when no provider-specific key matches.
    #[serde(default)]
    pub ai_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolsConfig {
    #[serde(default = "default_message_workers")]
    pub message_pool_size: usize,
    #[serde(default = "default_message_queue")]
    pub message_queue_size: usize,
    #[serde(default = "default_webhook_workers")]
    pub bot_webhook_pool_size: usize,
    #[serde(default = "default_webhook_queue")]
    pub bot_webhook_queue_size: usize,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            message_pool_size: default_message_workers(),
            message_queue_size: default_message_queue(),
            bot_webhook_pool_size: default_webhook_workers(),
            bot_webhook_queue_size: default_webhook_queue(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Allow plain-HTTP SSE servers. Also honoured via the
    /// MCP_ALLOW_INSECURE_HTTP env var for parity with deployments
    /// that set it process-wide.
    #[serde(default)]
    pub allow_insecure_http: bool,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            allow_insecure_http: env_flag("MCP_ALLOW_INSECURE_HTTP"),
        }
    }
}

/// Chatwoot-style helpdesk mirroring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelpdeskConfig {
    /// When false the /instances/{id}/chatwoot/webhook route is inert.
    #[serde(default)]
    pub capture_chatwoot_webhooks: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    /// Fallback token; bots with a chatwoot credential use that instead.
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Process-wide symmetric key for header/credential encryption.
    /// Set once at init; rotation is a restart operation.
    #[serde(default = "default_secret_key")]
    pub secret_key: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secret_key: default_secret_key(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    18790
}
fn default_debounce_ms() -> u64 {
    2_000
}
fn default_wait_idle_ms() -> u64 {
    180_000
}
fn default_read_window() -> u64 {
    30
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_max_history() -> i32 {
    10
}
fn default_message_workers() -> usize {
    4
}
fn default_message_queue() -> usize {
    200
}
fn default_webhook_workers() -> usize {
    4
}
fn default_webhook_queue() -> usize {
    16
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.charla/charla.db", home)
}
fn default_secret_key() -> String {
    "change-me".to_string()
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

impl CharlaConfig {
    /// Load config from a TOML file with CHARLA_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.charla/charla.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let mut config: CharlaConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CHARLA_").split("_"))
            .extract()
            .map_err(|e| crate::error::CharlaError::Config(e.to_string()))?;

        // The process-wide env flag wins over the TOML value when set.
        if env_flag("MCP_ALLOW_INSECURE_HTTP") {
            config.mcp.allow_insecure_http = true;
        }

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.charla/charla.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = CharlaConfig::default();
        assert_eq!(cfg.engine.debounce_ms, 2_000);
        assert_eq!(cfg.engine.max_history, 10);
        assert!(cfg.engine.typing_enabled);
        assert_eq!(cfg.pools.message_pool_size, 4);
        assert_eq!(cfg.pools.bot_webhook_queue_size, 16);
    }
}
