use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;

/// Initialise the bot/credential/MCP schema.
///
/// Safe to call on every startup. The base tables use `IF NOT EXISTS`;
/// later columns are added with additive `ALTER TABLE` so old databases
/// upgrade in place and newer databases with extra columns keep working.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS bots (
            id                     TEXT NOT NULL PRIMARY KEY,
            name                   TEXT NOT NULL,
            provider               TEXT NOT NULL,
            model                  TEXT NOT NULL,
            capabilities           TEXT NOT NULL DEFAULT '{}',   -- JSON flags
            system_prompt          TEXT NOT NULL DEFAULT '',
            knowledge_base         TEXT NOT NULL DEFAULT '',
            api_key                TEXT,
            credential_id          TEXT,
            chatwoot_credential_id TEXT,
            allowed_chats          TEXT NOT NULL DEFAULT '[]',   -- JSON array
            created_at             TEXT NOT NULL,
            updated_at             TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS credentials (
            id         TEXT NOT NULL PRIMARY KEY,
            kind       TEXT NOT NULL,
            secrets    TEXT NOT NULL DEFAULT '',                 -- encrypted JSON map
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS mcp_servers (
            id               TEXT NOT NULL PRIMARY KEY,
            name             TEXT NOT NULL,
            kind             TEXT NOT NULL,
            url              TEXT NOT NULL,
            headers          TEXT NOT NULL DEFAULT '',           -- encrypted JSON map
            tools_cache      TEXT NOT NULL DEFAULT '[]',         -- JSON array
            is_template      INTEGER NOT NULL DEFAULT 0,
            required_headers TEXT NOT NULL DEFAULT '[]',         -- JSON array
            updated_at       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS bot_mcp_configs (
            bot_id         TEXT NOT NULL,
            server_id      TEXT NOT NULL,
            enabled        INTEGER NOT NULL DEFAULT 0,
            disabled_tools TEXT NOT NULL DEFAULT '[]',           -- JSON array
            custom_headers TEXT NOT NULL DEFAULT '{}',           -- JSON map, values encrypted
            instructions   TEXT,
            PRIMARY KEY (bot_id, server_id)
        );",
    )?;

    // Additive migrations. Unknown columns in newer files are tolerated
    // because every SELECT names its columns.
    ensure_column(conn, "mcp_servers", "instructions", "TEXT")?;

    Ok(())
}

/// Add a column if it is missing. Duplicate-column errors are expected
/// on already-migrated databases and swallowed.
fn ensure_column(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {decl}");
    match conn.execute(&sql, []) {
        Ok(_) => {
            debug!(table, column, "added column");
            Ok(())
        }
        Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.contains("duplicate column") => {
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }
}
