use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::{channel::ChannelAdapter, error::ChannelError, types::ChannelStatus};

/// Minimum delay between reconnect attempts (seconds).
const BACKOFF_BASE_SECS: u64 = 5;
/// Maximum delay between reconnect attempts (seconds).
const BACKOFF_MAX_SECS: u64 = 300; // 5 minutes
/// Maximum number of reconnect attempts before giving up.
const MAX_ATTEMPTS: u32 = 10;
/// Jitter fraction applied to each delay (±10 %).
const JITTER_FRACTION: f64 = 0.10;

/// Registry of channel adapters.
///
/// Adapters are stored by [`ChannelAdapter::id`] and can be connected,
/// disconnected, or queried as a group. The manager applies exponential
/// backoff with jitter when a connection fails.
pub struct ChannelManager {
    channels: HashMap<String, Arc<dyn ChannelAdapter>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Register an adapter. An existing adapter with the same id is
    /// replaced.
    pub fn register(&mut self, channel: Arc<dyn ChannelAdapter>) {
        let id = channel.id().to_string();
        info!(channel = %id, "registering channel adapter");
        self.channels.insert(id, channel);
    }

    /// Connect all registered channels, sequentially, with backoff.
    pub async fn connect_all(&self) {
        for (id, channel) in &self.channels {
            info!(channel = %id, "connecting channel");
            if let Err(e) = connect_with_backoff(id, channel.as_ref()).await {
                error!(channel = %id, error = %e, "failed to connect channel after retries");
            }
        }
    }

    /// Disconnect all registered channels. Errors are logged but do not
    /// abort disconnection of the rest.
    pub async fn disconnect_all(&self) {
        for (id, channel) in &self.channels {
            info!(channel = %id, "disconnecting channel");
            if let Err(e) = channel.disconnect().await {
                warn!(channel = %id, error = %e, "error while disconnecting channel");
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.channels.get(id).cloned()
    }

    /// Current status per channel, sorted by id for deterministic output.
    pub fn statuses(&self) -> Vec<(String, ChannelStatus)> {
        let mut result: Vec<(String, ChannelStatus)> = self
            .channels
            .iter()
            .map(|(id, ch)| (id.clone(), ch.status()))
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Attempt to connect a single channel with exponential backoff and
/// ±10 % jitter: 5 s → 10 s → 20 s → … → 300 s cap.
async fn connect_with_backoff(
    id: &str,
    channel: &dyn ChannelAdapter,
) -> Result<(), ChannelError> {
    let mut delay_secs = BACKOFF_BASE_SECS;

    for attempt in 1..=MAX_ATTEMPTS {
        match channel.connect().await {
            Ok(()) => {
                info!(channel = %id, attempt, "channel connected successfully");
                return Ok(());
            }
            Err(e) if attempt == MAX_ATTEMPTS => {
                return Err(e);
            }
            Err(e) => {
                let jitter = jitter_secs(delay_secs);
                let total = delay_secs + jitter;
                warn!(
                    channel = %id,
                    attempt,
                    max = MAX_ATTEMPTS,
                    error = %e,
                    retry_after_secs = total,
                    "channel connect failed, retrying with backoff"
                );
                sleep(Duration::from_secs(total)).await;
                delay_secs = (delay_secs * 2).min(BACKOFF_MAX_SECS);
            }
        }
    }

    // Unreachable — the loop always returns inside the match arms above.
    unreachable!("backoff loop exited without returning")
}

fn jitter_secs(base_secs: u64) -> u64 {
    let max_jitter = ((base_secs as f64) * JITTER_FRACTION) as u64;
    if max_jitter == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=max_jitter)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::types::OutboundMessage;

    struct FlakyAdapter {
        attempts: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl ChannelAdapter for FlakyAdapter {
        fn id(&self) -> &str {
            "flaky"
        }
        async fn connect(&self) -> Result<(), ChannelError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.succeed_on {
                Ok(())
            } else {
                Err(ChannelError::ConnectionFailed("socket refused".into()))
            }
        }
        async fn disconnect(&self) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn send(&self, _msg: &OutboundMessage) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn send_typing(&self, _chat_id: &str, _typing: bool) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn set_online(&self, _online: bool) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn mark_read(
            &self,
            _chat_id: &str,
            _message_ids: &[String],
        ) -> Result<(), ChannelError> {
            Ok(())
        }
        fn status(&self) -> ChannelStatus {
            ChannelStatus::Connected
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_retries_until_success() {
        let adapter = FlakyAdapter {
            attempts: AtomicU32::new(0),
            succeed_on: 3,
        };
        connect_with_backoff("flaky", &adapter).await.unwrap();
        assert_eq!(adapter.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn registry_lookup() {
        let mut manager = ChannelManager::new();
        manager.register(Arc::new(FlakyAdapter {
            attempts: AtomicU32::new(0),
            succeed_on: 1,
        }));
        assert!(manager.get("flaky").is_some());
        assert!(manager.get("missing").is_none());
        assert_eq!(manager.statuses().len(), 1);
    }
}
