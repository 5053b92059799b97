use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Uniform contract over session storage backends.
///
/// Values are opaque serialized strings; the orchestrator owns the
/// entry shape. Two implementations ship: an in-process map with a
/// periodic eviction sweep ([`crate::MemoryStore`]) and a SQLite store
/// with a TTL column ([`crate::SqliteStore`]) filling the
/// distributed-KV role on a single node.
///
/// `lock`/`unlock` are cooperative and best-effort — they serialize
/// replies across replicas on the same conversation, nothing more.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Upsert `value` under `key` with a sliding TTL.
    async fn save(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Remove an entry. Returns whether it was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// All live (unexpired) entries.
    async fn get_all(&self) -> Result<Vec<(String, String)>>;

    /// Keys of live entries starting with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Try to take the named cooperative lock. Returns false when it is
    /// already held and unexpired.
    async fn lock(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn unlock(&self, key: &str) -> Result<()>;
}
