use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::error::Result;
use crate::store::SessionStore;

/// How often the background sweep evicts expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(600);

struct StoredEntry {
    value: String,
    expires_at: Instant,
}

/// In-process session store.
///
/// Reads enforce TTL lazily; a periodic sweep reclaims entries nobody
/// touches. Locks live in a separate map with their own expiry.
pub struct MemoryStore {
    entries: DashMap<String, StoredEntry>,
    locks: DashMap<String, Instant>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Spawn the eviction sweep. The task runs until aborted.
    pub fn spawn_sweeper(store: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                store.sweep();
            }
        })
    }

    /// Drop every expired entry and lock. Returns how many entries went.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        self.locks.retain(|_, expires| *expires > now);
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!(evicted, "memory store sweep");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Expired entries are removed on the read that discovers them.
        self.entries
            .remove_if(key, |_, entry| entry.expires_at <= Instant::now());
        Ok(None)
    }

    async fn save(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn get_all(&self) -> Result<Vec<(String, String)>> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.expires_at > now)
            .map(|entry| (entry.key().clone(), entry.value.clone()))
            .collect())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.expires_at > now && entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut acquired = false;
        // entry() gives us atomic check-and-set per key.
        self.locks
            .entry(key.to_string())
            .and_modify(|expires| {
                if *expires <= now {
                    *expires = now + ttl;
                    acquired = true;
                }
            })
            .or_insert_with(|| {
                acquired = true;
                now + ttl
            });
        Ok(acquired)
    }

    async fn unlock(&self, key: &str) -> Result<()> {
        self.locks.remove(key);
        Ok(())
    }
}
