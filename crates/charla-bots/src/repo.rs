use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::Connection;
use tracing::{instrument, warn};

use charla_core::SecretBox;

use crate::db::init_db;
use crate::error::{BotsError, Result};
use crate::types::{
    Bot, BotMcpConfig, Capabilities, Credential, CredentialKind, McpServer, Provider,
    RequiredHeader,
};

/// Repository over the bots / credentials / MCP tables.
///
/// Wraps a single SQLite connection in a `Mutex`; the tables are
/// read-mostly shared data and contention is negligible. All sensitive
/// columns pass through the process [`SecretBox`] on the way in and out.
pub struct BotRepository {
    db: Mutex<Connection>,
    crypto: Arc<SecretBox>,
}

impl BotRepository {
    pub fn new(conn: Connection, crypto: Arc<SecretBox>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            crypto,
        })
    }

    // ── Bots ─────────────────────────────────────────────────────────────

    #[instrument(skip(self, bot), fields(bot_id = %bot.id))]
    pub fn save_bot(&self, bot: &Bot) -> Result<()> {
        bot.validate()?;
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO bots
             (id, name, provider, model, capabilities, system_prompt, knowledge_base,
              api_key, credential_id, chatwoot_credential_id, allowed_chats,
              created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?12)
             ON CONFLICT(id) DO UPDATE SET
               name = ?2, provider = ?3, model = ?4, capabilities = ?5,
               system_prompt = ?6, knowledge_base = ?7, api_key = ?8,
               credential_id = ?9, chatwoot_credential_id = ?10,
               allowed_chats = ?11, updated_at = ?12",
            rusqlite::params![
                bot.id,
                bot.name,
                bot.provider.to_string(),
                bot.model,
                serde_json::to_string(&bot.capabilities)?,
                bot.system_prompt,
                bot.knowledge_base,
                bot.api_key,
                bot.credential_id,
                bot.chatwoot_credential_id,
                serde_json::to_string(&bot.allowed_chats)?,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn get_bot(&self, id: &str) -> Result<Bot> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, name, provider, model, capabilities, system_prompt,
                    knowledge_base, api_key, credential_id, chatwoot_credential_id,
                    allowed_chats, created_at, updated_at
             FROM bots WHERE id = ?1",
            [id],
            row_to_bot,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => BotsError::NotFound {
                entity: "bot",
                id: id.to_string(),
            },
            other => other.into(),
        })
    }

    pub fn list_bots(&self) -> Result<Vec<Bot>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, name, provider, model, capabilities, system_prompt,
                    knowledge_base, api_key, credential_id, chatwoot_credential_id,
                    allowed_chats, created_at, updated_at
             FROM bots ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], row_to_bot)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn delete_bot(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM bots WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(BotsError::NotFound {
                entity: "bot",
                id: id.to_string(),
            });
        }
        db.execute("DELETE FROM bot_mcp_configs WHERE bot_id = ?1", [id])?;
        Ok(())
    }

    // ── Credentials ──────────────────────────────────────────────────────

    #[instrument(skip(self, secrets))]
    pub fn save_credential(
        &self,
        id: &str,
        kind: CredentialKind,
        secrets: &HashMap<String, String>,
    ) -> Result<()> {
        if id.trim().is_empty() {
            return Err(BotsError::Validation("credential id must not be empty".into()));
        }
        let now = Utc::now().to_rfc3339();
        let encrypted = self.crypto.encrypt_map(secrets);
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO credentials (id, kind, secrets, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET kind = ?2, secrets = ?3",
            rusqlite::params![id, kind.to_string(), encrypted, now],
        )?;
        Ok(())
    }

    pub fn get_credential(&self, id: &str) -> Result<Credential> {
        let db = self.db.lock().unwrap();
        let (kind_str, encrypted, created_at) = db
            .query_row(
                "SELECT kind, secrets, created_at FROM credentials WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => BotsError::NotFound {
                    entity: "credential",
                    id: id.to_string(),
                },
                other => other.into(),
            })?;

        let secrets = self.crypto.decrypt_map(&encrypted);
        if secrets.is_none() {
            warn!(credential_id = %id, "credential secrets could not be decrypted");
        }
        Ok(Credential {
            id: id.to_string(),
            kind: kind_str.parse()?,
            secrets,
            created_at,
        })
    }

    // ── MCP servers ──────────────────────────────────────────────────────

    /// Persist a server record. `headers` are encrypted as one JSON map.
    #[instrument(skip(self, server), fields(server_id = %server.id))]
    pub fn save_server(&self, server: &McpServer, allow_insecure_http: bool) -> Result<()> {
        server.validate(allow_insecure_http)?;
        let now = Utc::now().to_rfc3339();
        let headers_enc = self
            .crypto
            .encrypt_map(server.headers.as_ref().unwrap_or(&HashMap::new()));
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO mcp_servers
             (id, name, kind, url, headers, tools_cache, is_template,
              required_headers, instructions, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
             ON CONFLICT(id) DO UPDATE SET
               name = ?2, kind = ?3, url = ?4, headers = ?5, tools_cache = ?6,
               is_template = ?7, required_headers = ?8, instructions = ?9,
               updated_at = ?10",
            rusqlite::params![
                server.id,
                server.name,
                server.kind.to_string(),
                server.url,
                headers_enc,
                serde_json::to_string(&server.tools_cache)?,
                server.is_template as i64,
                serde_json::to_string(&server.required_headers)?,
                server.instructions,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn get_server(&self, id: &str) -> Result<McpServer> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT id, name, kind, url, headers, tools_cache, is_template,
                        required_headers, instructions, updated_at
                 FROM mcp_servers WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, Option<String>>(8)?,
                        row.get::<_, String>(9)?,
                    ))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => BotsError::NotFound {
                    entity: "mcp server",
                    id: id.to_string(),
                },
                other => other.into(),
            })?;

        let (id, name, kind_str, url, headers_enc, tools_json, is_template, req_json, instructions, updated_at) =
            row;
        let headers = self.crypto.decrypt_map(&headers_enc);
        if headers.is_none() {
            warn!(server_id = %id, "server headers could not be decrypted");
        }
        Ok(McpServer {
            id,
            name,
            kind: kind_str.parse()?,
            url,
            headers,
            tools_cache: serde_json::from_str(&tools_json).unwrap_or_default(),
            is_template: is_template != 0,
            required_headers: serde_json::from_str::<Vec<RequiredHeader>>(&req_json)
                .unwrap_or_default(),
            instructions,
            updated_at,
        })
    }

    /// Refresh the persisted tool-name cache after a successful handshake.
    pub fn update_tools_cache(&self, server_id: &str, tools: &[String]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE mcp_servers SET tools_cache = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![serde_json::to_string(tools)?, now, server_id],
        )?;
        Ok(())
    }

    // ── Bot ↔ MCP configs ────────────────────────────────────────────────

    /// Persist a per-bot server config. Header values are encrypted
    /// individually so a partial decrypt failure loses one header, not
    /// the whole map.
    #[instrument(skip(self, config), fields(bot_id = %config.bot_id, server_id = %config.server_id))]
    pub fn save_bot_config(&self, config: &BotMcpConfig) -> Result<()> {
        let mut encrypted_headers = HashMap::new();
        if let Some(headers) = &config.custom_headers {
            for (name, value) in headers {
                match self.crypto.encrypt(value) {
                    Ok(enc) => {
                        encrypted_headers.insert(name.clone(), enc);
                    }
                    Err(e) => {
                        warn!(header = %name, error = %e, "header encryption failed, dropping");
                    }
                }
            }
        }

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO bot_mcp_configs
             (bot_id, server_id, enabled, disabled_tools, custom_headers, instructions)
             VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(bot_id, server_id) DO UPDATE SET
               enabled = ?3, disabled_tools = ?4, custom_headers = ?5, instructions = ?6",
            rusqlite::params![
                config.bot_id,
                config.server_id,
                config.enabled as i64,
                serde_json::to_string(&config.disabled_tools)?,
                serde_json::to_string(&encrypted_headers)?,
                config.instructions,
            ],
        )?;
        Ok(())
    }

    pub fn get_bot_config(&self, bot_id: &str, server_id: &str) -> Result<Option<BotMcpConfig>> {
        let db = self.db.lock().unwrap();
        let row = db.query_row(
            "SELECT enabled, disabled_tools, custom_headers, instructions
             FROM bot_mcp_configs WHERE bot_id = ?1 AND server_id = ?2",
            [bot_id, server_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        );
        let (enabled, disabled_json, headers_json, instructions) = match row {
            Ok(r) => r,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        drop(db);

        Ok(Some(BotMcpConfig {
            bot_id: bot_id.to_string(),
            server_id: server_id.to_string(),
            enabled: enabled != 0,
            disabled_tools: serde_json::from_str(&disabled_json).unwrap_or_default(),
            custom_headers: Some(self.decrypt_header_values(&headers_json)),
            instructions,
        }))
    }

    /// Server ids this bot has enabled.
    pub fn enabled_server_ids(&self, bot_id: &str) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT server_id FROM bot_mcp_configs WHERE bot_id = ?1 AND enabled = 1",
        )?;
        let rows = stmt.query_map([bot_id], |row| row.get::<_, String>(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn decrypt_header_values(&self, headers_json: &str) -> HashMap<String, String> {
        let encrypted: HashMap<String, String> =
            serde_json::from_str(headers_json).unwrap_or_default();
        encrypted
            .into_iter()
            .filter_map(|(name, enc)| match self.crypto.decrypt(&enc) {
                Ok(value) => Some((name, value)),
                Err(_) => {
                    warn!(header = %name, "custom header could not be decrypted, skipping");
                    None
                }
            })
            .collect()
    }
}

fn row_to_bot(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bot> {
    let provider_str: String = row.get(2)?;
    let capabilities_json: String = row.get(4)?;
    let allowed_json: String = row.get(10)?;

    Ok(Bot {
        id: row.get(0)?,
        name: row.get(1)?,
        provider: provider_str.parse::<Provider>().unwrap_or(Provider::Ai),
        model: row.get(3)?,
        capabilities: serde_json::from_str::<Capabilities>(&capabilities_json)
            .unwrap_or_default(),
        system_prompt: row.get(5)?,
        knowledge_base: row.get(6)?,
        api_key: row.get(7)?,
        credential_id: row.get(8)?,
        chatwoot_credential_id: row.get(9)?,
        allowed_chats: serde_json::from_str(&allowed_json).unwrap_or_default(),
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::McpTransportKind;

    fn repo() -> BotRepository {
        BotRepository::new(
            Connection::open_in_memory().unwrap(),
            Arc::new(SecretBox::new("test-secret")),
        )
        .unwrap()
    }

    fn sample_bot(id: &str) -> Bot {
        Bot {
            id: id.into(),
            name: "Ventas".into(),
            provider: Provider::Gemini,
            model: "gemini-2.0-flash".into(),
            capabilities: Capabilities {
                audio: true,
                image: true,
                ..Default::default()
            },
            system_prompt: "Eres un asistente de ventas.".into(),
            knowledge_base: String::new(),
            api_key: None,
            credential_id: None,
            chatwoot_credential_id: None,
            allowed_chats: vec![],
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn bot_roundtrip() {
        let repo = repo();
        repo.save_bot(&sample_bot("bot-1")).unwrap();
        let bot = repo.get_bot("bot-1").unwrap();
        assert_eq!(bot.name, "Ventas");
        assert_eq!(bot.provider, Provider::Gemini);
        assert!(bot.capabilities.audio);
        assert!(!bot.capabilities.video);

        assert!(matches!(
            repo.get_bot("nope"),
            Err(BotsError::NotFound { .. })
        ));
    }

    #[test]
    fn credential_secrets_are_encrypted_at_rest() {
        let repo = repo();
        let mut secrets = HashMap::new();
        secrets.insert("api_key".to_string(), "sk-super-secret".to_string());
        repo.save_credential("cred-1", CredentialKind::Gemini, &secrets)
            .unwrap();

        // Raw column must not contain the plaintext.
        let raw: String = repo
            .db
            .lock()
            .unwrap()
            .query_row("SELECT secrets FROM credentials WHERE id = 'cred-1'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert!(!raw.contains("sk-super-secret"));

        let cred = repo.get_credential("cred-1").unwrap();
        assert_eq!(cred.secret("api_key"), Some("sk-super-secret"));
    }

    #[test]
    fn bot_config_header_values_roundtrip() {
        let repo = repo();
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer X".to_string());
        repo.save_bot_config(&BotMcpConfig {
            bot_id: "bot-1".into(),
            server_id: "srv-1".into(),
            enabled: true,
            disabled_tools: vec!["dangerous_tool".into()],
            custom_headers: Some(headers.clone()),
            instructions: None,
        })
        .unwrap();

        let config = repo.get_bot_config("bot-1", "srv-1").unwrap().unwrap();
        assert!(config.enabled);
        assert_eq!(config.custom_headers, Some(headers));
        assert_eq!(config.disabled_tools, vec!["dangerous_tool".to_string()]);
        assert_eq!(repo.enabled_server_ids("bot-1").unwrap(), vec!["srv-1"]);
    }

    #[test]
    fn insecure_sse_server_is_rejected() {
        let repo = repo();
        let server = McpServer {
            id: "srv-sse".into(),
            name: "tools".into(),
            kind: McpTransportKind::Sse,
            url: "http://insecure.example/sse".into(),
            headers: None,
            tools_cache: vec![],
            is_template: false,
            required_headers: vec![],
            instructions: None,
            updated_at: String::new(),
        };
        assert!(matches!(
            repo.save_server(&server, false),
            Err(BotsError::Validation(_))
        ));
        repo.save_server(&server, true).unwrap();
    }
}
