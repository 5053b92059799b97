use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{BotsError, Result};

/// AI backend family a bot is wired to. `Ai` means "whatever the
/// generic fallback key points at".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ai,
    Gemini,
    OpenAi,
    Claude,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Provider::Ai => "ai",
            Provider::Gemini => "gemini",
            Provider::OpenAi => "openai",
            Provider::Claude => "claude",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Provider {
    type Err = BotsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ai" => Ok(Provider::Ai),
            "gemini" => Ok(Provider::Gemini),
            "openai" => Ok(Provider::OpenAi),
            "claude" => Ok(Provider::Claude),
            other => Err(BotsError::Validation(format!("unknown provider: {other}"))),
        }
    }
}

/// Per-modality capability flags.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub audio: bool,
    #[serde(default)]
    pub image: bool,
    #[serde(default)]
    pub video: bool,
    #[serde(default)]
    pub document: bool,
    #[serde(default)]
    pub memory: bool,
}

/// A configured bot identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: String,
    pub name: String,
    pub provider: Provider,
    pub model: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub knowledge_base: String,
    /// Direct key. When empty, resolution falls back through the
    /// credential, then the global provider config, then the generic key.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub credential_id: Option<String>,
    #[serde(default)]
    pub chatwoot_credential_id: Option<String>,
    /// Chat identities allowed to talk to this bot. Empty = all.
    #[serde(default)]
    pub allowed_chats: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Bot {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(BotsError::Validation("bot id must not be empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(BotsError::Validation("bot model must not be empty".into()));
        }
        Ok(())
    }

    pub fn chat_allowed(&self, chat_id: &str) -> bool {
        self.allowed_chats.is_empty() || self.allowed_chats.iter().any(|c| c == chat_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Ai,
    Gemini,
    OpenAi,
    Claude,
    Chatwoot,
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CredentialKind::Ai => "ai",
            CredentialKind::Gemini => "gemini",
            CredentialKind::OpenAi => "openai",
            CredentialKind::Claude => "claude",
            CredentialKind::Chatwoot => "chatwoot",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for CredentialKind {
    type Err = BotsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ai" => Ok(CredentialKind::Ai),
            "gemini" => Ok(CredentialKind::Gemini),
            "openai" => Ok(CredentialKind::OpenAi),
            "claude" => Ok(CredentialKind::Claude),
            "chatwoot" => Ok(CredentialKind::Chatwoot),
            other => Err(BotsError::Validation(format!(
                "unknown credential kind: {other}"
            ))),
        }
    }
}

/// A stored credential. `secrets` holds the kind-specific fields
/// (api_key for AI kinds; token/account_id/base_url for chatwoot),
/// encrypted at rest and decrypted by the repository on read.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: String,
    pub kind: CredentialKind,
    /// None when decryption failed (wrong process key).
    pub secrets: Option<HashMap<String, String>>,
    pub created_at: String,
}

impl Credential {
    pub fn secret(&self, field: &str) -> Option<&str> {
        self.secrets.as_ref()?.get(field).map(String::as_str)
    }
}

/// MCP transport flavour. The network gateway speaks `sse` and `http`;
/// `stdio` is representable but rejected at validation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportKind {
    Stdio,
    Sse,
    Http,
}

impl std::fmt::Display for McpTransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            McpTransportKind::Stdio => "stdio",
            McpTransportKind::Sse => "sse",
            McpTransportKind::Http => "http",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for McpTransportKind {
    type Err = BotsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stdio" => Ok(McpTransportKind::Stdio),
            "sse" => Ok(McpTransportKind::Sse),
            "http" => Ok(McpTransportKind::Http),
            other => Err(BotsError::Validation(format!(
                "unknown MCP transport: {other}"
            ))),
        }
    }
}

/// Descriptor for a header a template server requires from each bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredHeader {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A remote tool server record.
#[derive(Debug, Clone)]
pub struct McpServer {
    pub id: String,
    pub name: String,
    pub kind: McpTransportKind,
    pub url: String,
    /// Decrypted server-level headers. None when decryption failed.
    pub headers: Option<HashMap<String, String>>,
    /// Last known tool names, cached across restarts.
    pub tools_cache: Vec<String>,
    /// Template servers require per-bot headers before use.
    pub is_template: bool,
    pub required_headers: Vec<RequiredHeader>,
    /// Server-global usage instructions merged into prompts.
    pub instructions: Option<String>,
    pub updated_at: String,
}

impl McpServer {
    /// Enforce the transport invariants: SSE must be HTTPS unless the
    /// process explicitly allows insecure endpoints.
    pub fn validate(&self, allow_insecure_http: bool) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(BotsError::Validation("server id must not be empty".into()));
        }
        match self.kind {
            McpTransportKind::Stdio => Ok(()),
            McpTransportKind::Sse => {
                if self.url.starts_with("https://") || allow_insecure_http {
                    Ok(())
                } else {
                    Err(BotsError::Validation(format!(
                        "SSE server url must be https:// (got {})",
                        self.url
                    )))
                }
            }
            McpTransportKind::Http => {
                if self.url.starts_with("http://") || self.url.starts_with("https://") {
                    Ok(())
                } else {
                    Err(BotsError::Validation(format!(
                        "server url must be http(s):// (got {})",
                        self.url
                    )))
                }
            }
        }
    }
}

/// Per-(bot, server) overrides. Composite primary key.
#[derive(Debug, Clone)]
pub struct BotMcpConfig {
    pub bot_id: String,
    pub server_id: String,
    pub enabled: bool,
    pub disabled_tools: Vec<String>,
    /// Decrypted per-bot headers merged over the server's own at call
    /// time. None when decryption failed.
    pub custom_headers: Option<HashMap<String, String>>,
    pub instructions: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_roundtrip() {
        for p in [Provider::Ai, Provider::Gemini, Provider::OpenAi, Provider::Claude] {
            let s = p.to_string();
            assert_eq!(s.parse::<Provider>().unwrap(), p);
        }
        assert!("mistral".parse::<Provider>().is_err());
    }

    #[test]
    fn sse_requires_https() {
        let mut server = McpServer {
            id: "srv-1".into(),
            name: "tools".into(),
            kind: McpTransportKind::Sse,
            url: "http://tools.internal/sse".into(),
            headers: None,
            tools_cache: vec![],
            is_template: false,
            required_headers: vec![],
            instructions: None,
            updated_at: String::new(),
        };
        assert!(server.validate(false).is_err());
        assert!(server.validate(true).is_ok());

        server.url = "https://tools.internal/sse".into();
        assert!(server.validate(false).is_ok());
    }

    #[test]
    fn allow_list_empty_means_open() {
        let bot = Bot {
            id: "b".into(),
            name: "b".into(),
            provider: Provider::Gemini,
            model: "gemini-2.0-flash".into(),
            capabilities: Capabilities::default(),
            system_prompt: String::new(),
            knowledge_base: String::new(),
            api_key: None,
            credential_id: None,
            chatwoot_credential_id: None,
            allowed_chats: vec![],
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert!(bot.chat_allowed("any"));

        let restricted = Bot {
            allowed_chats: vec!["5491155551234".into()],
            ..bot
        };
        assert!(restricted.chat_allowed("5491155551234"));
        assert!(!restricted.chat_allowed("other"));
    }
}
