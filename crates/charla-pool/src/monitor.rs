use std::sync::Arc;

use dashmap::DashMap;

use crate::pool::{PoolStats, WorkerPool};

/// Shared registry of named pools backing the stats endpoints.
///
/// Both the transport-message pool and the bot-webhook pool register
/// here at startup; HTTP handlers look them up by name.
#[derive(Default)]
pub struct PoolMonitor {
    pools: DashMap<String, Arc<WorkerPool>>,
}

impl PoolMonitor {
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
        }
    }

    pub fn register(&self, pool: Arc<WorkerPool>) {
        self.pools.insert(pool.name().to_string(), pool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkerPool>> {
        self.pools.get(name).map(|entry| entry.value().clone())
    }

    pub fn stats(&self, name: &str) -> Option<PoolStats> {
        self.get(name).map(|pool| pool.stats())
    }

    pub async fn shutdown_all(&self) {
        let pools: Vec<Arc<WorkerPool>> =
            self.pools.iter().map(|entry| entry.value().clone()).collect();
        for pool in pools {
            pool.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_by_name() {
        let monitor = PoolMonitor::new();
        monitor.register(Arc::new(WorkerPool::new("worker-pool", 2, 8)));
        assert!(monitor.stats("worker-pool").is_some());
        assert!(monitor.stats("bot-webhook-pool").is_none());
        monitor.shutdown_all().await;
    }
}
