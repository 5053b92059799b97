use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;
use crate::store::SessionStore;

/// SQLite-backed session store with a native TTL column.
///
/// Fills the distributed-KV role of the store contract on a single
/// node: entries survive restarts, expiry is enforced on read, and the
/// cooperative locks live in their own table so multiple processes
/// sharing the file serialize correctly.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Remove every expired row. Safe to call at any cadence.
    pub fn sweep(&self) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let entries = db.execute("DELETE FROM kv_sessions WHERE expires_at <= ?1", [&now])?;
        db.execute("DELETE FROM store_locks WHERE expires_at <= ?1", [&now])?;
        if entries > 0 {
            debug!(evicted = entries, "sqlite store sweep");
        }
        Ok(entries)
    }
}

/// Idempotent schema init. RFC3339 timestamps compare lexicographically,
/// so expiry checks are plain string comparisons.
fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv_sessions (
            key        TEXT NOT NULL PRIMARY KEY,
            value      TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_kv_sessions_expiry ON kv_sessions (expires_at);

        CREATE TABLE IF NOT EXISTS store_locks (
            key        TEXT NOT NULL PRIMARY KEY,
            expires_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn expiry_string(ttl: Duration) -> String {
    (Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()))
        .to_rfc3339()
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT value FROM kv_sessions WHERE key = ?1 AND expires_at > ?2",
            rusqlite::params![key, now],
            |row| row.get::<_, String>(0),
        ) {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let expires = expiry_string(ttl);
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO kv_sessions (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, expires_at = ?3",
            rusqlite::params![key, value, expires],
        )?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM kv_sessions WHERE key = ?1", [key])?;
        Ok(n > 0)
    }

    async fn get_all(&self) -> Result<Vec<(String, String)>> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let mut stmt =
            db.prepare("SELECT key, value FROM kv_sessions WHERE expires_at > ?1")?;
        let rows = stmt.query_map([&now], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Utc::now().to_rfc3339();
        // Escape LIKE wildcards so a literal prefix scan stays literal.
        let pattern = format!(
            "{}%",
            prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT key FROM kv_sessions
             WHERE key LIKE ?1 ESCAPE '\\' AND expires_at > ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![pattern, now], |row| {
            row.get::<_, String>(0)
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let expires = expiry_string(ttl);
        let db = self.db.lock().unwrap();
        // Take the lock iff absent or expired; the row count tells us
        // whether we won.
        let n = db.execute(
            "INSERT INTO store_locks (key, expires_at) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET expires_at = ?2
             WHERE store_locks.expires_at <= ?3",
            rusqlite::params![key, expires, now],
        )?;
        Ok(n > 0)
    }

    async fn unlock(&self, key: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM store_locks WHERE key = ?1", [key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> SqliteStore {
        SqliteStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn roundtrip_and_ttl() {
        let store = open();
        store
            .save("wa|c|s", "{\"focus\":10}".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(store.get("wa|c|s").await.unwrap().is_some());

        store
            .save("wa|c|s", "{}".into(), Duration::from_secs(0))
            .await
            .unwrap();
        assert_eq!(store.get("wa|c|s").await.unwrap(), None);
        assert_eq!(store.sweep().unwrap(), 1);
    }

    #[tokio::test]
    async fn prefix_scan_escapes_like_wildcards() {
        let store = open();
        let ttl = Duration::from_secs(60);
        store.save("wa|c1|a", "1".into(), ttl).await.unwrap();
        store.save("waXc1Ya", "2".into(), ttl).await.unwrap();

        let keys = store.list("wa|c1|").await.unwrap();
        assert_eq!(keys, vec!["wa|c1|a".to_string()]);
    }

    #[tokio::test]
    async fn lock_contention() {
        let store = open();
        assert!(store.lock("sched", Duration::from_secs(30)).await.unwrap());
        assert!(!store.lock("sched", Duration::from_secs(30)).await.unwrap());
        store.unlock("sched").await.unwrap();
        assert!(store.lock("sched", Duration::from_secs(30)).await.unwrap());
    }
}
