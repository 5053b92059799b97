//! Two-tier scheduler.
//!
//! A promoter moves posts due within the next 24 h from SQLite into an
//! in-memory queue sorted by delivery epoch; the executor pops due
//! entries and hands them to the channel adapter. Both run in one loop
//! that sleeps adaptively until the next score, capped at an hour, and
//! can be woken early by a signal.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use charla_store::SessionStore;

use crate::db::PostStore;
use crate::error::Result;
use crate::types::ScheduledPost;

/// Promotion horizon.
const PROMOTE_WINDOW: Duration = Duration::from_secs(24 * 3600);
/// Longest the loop will sleep without re-checking the store.
const MAX_SLEEP: Duration = Duration::from_secs(3600);
/// Distributed lock held while promoting (short — one scan).
const PROMOTER_LOCK_TTL: Duration = Duration::from_secs(30);
/// Per-post lock held around delivery.
const POST_LOCK_TTL: Duration = Duration::from_secs(60);

const PROMOTER_LOCK_KEY: &str = "scheduler:promoter";

/// Delivery capability the engine needs from the channel layer.
#[async_trait]
pub trait PostSender: Send + Sync {
    async fn send_post(&self, post: &ScheduledPost) -> std::result::Result<(), String>;
}

pub struct SchedulerEngine {
    posts: Arc<PostStore>,
    /// Cooperative locks ride on the session store so replicas sharing
    /// a distributed backend serialize promotion and delivery.
    locks: Arc<dyn SessionStore>,
    sender: Arc<dyn PostSender>,
    queue: Mutex<BTreeMap<(i64, String), ScheduledPost>>,
    signal: Arc<Notify>,
}

impl SchedulerEngine {
    pub fn new(
        posts: Arc<PostStore>,
        locks: Arc<dyn SessionStore>,
        sender: Arc<dyn PostSender>,
    ) -> Self {
        Self {
            posts,
            locks,
            sender,
            queue: Mutex::new(BTreeMap::new()),
            signal: Arc::new(Notify::new()),
        }
    }

    /// Handle for pub/sub-style wakeups (a post was just added).
    pub fn signal(&self) -> Arc<Notify> {
        self.signal.clone()
    }

    /// Main loop. Runs until `shutdown` broadcasts `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        loop {
            if let Err(e) = self.promote_due().await {
                error!(error = %e, "promoter pass failed");
            }
            self.execute_due().await;

            let sleep_for = self.next_sleep();
            debug!(sleep_ms = sleep_for.as_millis() as u64, "scheduler sleeping");
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.signal.notified() => {
                    debug!("scheduler woken by signal");
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Promoter: pending → enqueued, under a replica-wide lock.
    pub async fn promote_due(&self) -> Result<usize> {
        if !self.locks.lock(PROMOTER_LOCK_KEY, PROMOTER_LOCK_TTL).await? {
            debug!("another replica holds the promoter lock");
            return Ok(0);
        }

        let promoted = {
            let due = self.posts.due_within(PROMOTE_WINDOW)?;
            let mut queue = self.queue.lock().unwrap();
            let mut promoted = 0;
            for post in due {
                if let Err(e) = self.posts.mark_enqueued(&post.id) {
                    warn!(post_id = %post.id, error = %e, "enqueue mark failed");
                    continue;
                }
                queue.insert((post.epoch(), post.id.clone()), post);
                promoted += 1;
            }
            promoted
        };

        let _ = self.locks.unlock(PROMOTER_LOCK_KEY).await;
        if promoted > 0 {
            info!(promoted, "posts promoted to the delivery queue");
        }
        Ok(promoted)
    }

    /// Executor: deliver every queued post whose score has arrived.
    pub async fn execute_due(&self) {
        loop {
            let post = {
                let mut queue = self.queue.lock().unwrap();
                let now = Utc::now().timestamp();
                match queue.first_key_value() {
                    Some(((epoch, _), _)) if *epoch <= now => queue.pop_first().map(|(_, p)| p),
                    _ => None,
                }
            };
            let Some(post) = post else { break };
            self.deliver(post).await;
        }
    }

    async fn deliver(&self, post: ScheduledPost) {
        let lock_key = format!("scheduler:post:{}", post.id);
        match self.locks.lock(&lock_key, POST_LOCK_TTL).await {
            Ok(true) => {}
            _ => {
                debug!(post_id = %post.id, "post locked by another replica, skipping");
                return;
            }
        }

        match self.sender.send_post(&post).await {
            Ok(()) => {
                info!(post_id = %post.id, target = %post.target_id, "scheduled post delivered");
                if let Err(e) = self.posts.delete(&post.id) {
                    warn!(post_id = %post.id, error = %e, "delivered post cleanup failed");
                }
            }
            Err(reason) => {
                warn!(post_id = %post.id, error = %reason, "scheduled post delivery failed");
                if let Err(e) = self.posts.mark_failed(&post.id, &reason) {
                    warn!(post_id = %post.id, error = %e, "failure mark failed");
                }
            }
        }

        let _ = self.locks.unlock(&lock_key).await;
    }

    /// Sleep until the next queued score, capped at [`MAX_SLEEP`].
    fn next_sleep(&self) -> Duration {
        let queue = self.queue.lock().unwrap();
        match queue.first_key_value() {
            Some(((epoch, _), _)) => {
                let delta = *epoch - Utc::now().timestamp();
                if delta <= 0 {
                    Duration::ZERO
                } else {
                    Duration::from_secs(delta as u64).min(MAX_SLEEP)
                }
            }
            None => MAX_SLEEP,
        }
    }

    pub fn queued_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use charla_store::MemoryStore;
    use rusqlite::Connection;

    use super::*;
    use crate::types::PostStatus;

    struct FakeSender {
        sent: Mutex<Vec<String>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl PostSender for FakeSender {
        async fn send_post(&self, post: &ScheduledPost) -> std::result::Result<(), String> {
            if self.fail.load(Ordering::SeqCst) {
                return Err("adapter offline".to_string());
            }
            self.sent.lock().unwrap().push(post.id.clone());
            Ok(())
        }
    }

    fn engine() -> (Arc<SchedulerEngine>, Arc<PostStore>, Arc<FakeSender>) {
        let posts = Arc::new(PostStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let sender = Arc::new(FakeSender {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        });
        let engine = Arc::new(SchedulerEngine::new(
            posts.clone(),
            Arc::new(MemoryStore::new()),
            sender.clone(),
        ));
        (engine, posts, sender)
    }

    #[tokio::test]
    async fn promote_then_deliver_then_delete() {
        let (engine, posts, sender) = engine();
        let post = posts
            .add("wa", "group-1", "¡Hola a todos!", Utc::now())
            .unwrap();

        assert_eq!(engine.promote_due().await.unwrap(), 1);
        assert_eq!(engine.queued_len(), 1);
        assert_eq!(posts.get(&post.id).unwrap().status, PostStatus::Enqueued);

        engine.execute_due().await;
        assert_eq!(*sender.sent.lock().unwrap(), vec![post.id.clone()]);
        assert!(posts.get(&post.id).is_err(), "delivered post is deleted");
        assert_eq!(engine.queued_len(), 0);
    }

    #[tokio::test]
    async fn failed_delivery_marks_error() {
        let (engine, posts, sender) = engine();
        sender.fail.store(true, Ordering::SeqCst);
        let post = posts.add("wa", "group-1", "texto", Utc::now()).unwrap();

        engine.promote_due().await.unwrap();
        engine.execute_due().await;

        let failed = posts.get(&post.id).unwrap();
        assert_eq!(failed.status, PostStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("adapter offline"));
    }

    #[tokio::test]
    async fn future_posts_wait_their_turn() {
        let (engine, posts, sender) = engine();
        posts
            .add("wa", "g", "mañana", Utc::now() + chrono::Duration::hours(2))
            .unwrap();

        engine.promote_due().await.unwrap();
        assert_eq!(engine.queued_len(), 1);

        engine.execute_due().await;
        assert!(sender.sent.lock().unwrap().is_empty());
        assert_eq!(engine.queued_len(), 1);

        // Adaptive sleep targets the next score but stays under the cap.
        let sleep = engine.next_sleep();
        assert!(sleep > Duration::from_secs(3000));
        assert!(sleep <= Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn promoter_lock_excludes_replicas() {
        let (engine, posts, _) = engine();
        posts.add("wa", "g", "x", Utc::now()).unwrap();

        // Simulate another replica holding the promoter lock.
        engine
            .locks
            .lock(PROMOTER_LOCK_KEY, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(engine.promote_due().await.unwrap(), 0);

        engine.locks.unlock(PROMOTER_LOCK_KEY).await.unwrap();
        assert_eq!(engine.promote_due().await.unwrap(), 1);
    }
}
