//! The per-chat state machine.
//!
//! One session per `channel|chat|sender` key moves between Debouncing,
//! Processing and Waiting. Timers (debounce, inactivity warning, final
//! expiry) live in a local map beside the store — never inside the
//! persisted value — and are always stopped before being replaced.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use charla_core::{CharlaError, MediaItem};
use charla_humanizer::reading_time;
use charla_store::SessionStore;

use crate::debounce::{debounce_duration, draw_jitter};
use crate::error::Result;
use crate::focus::{self, FOCUS_HIGH};
use crate::types::{SessionEntry, SessionKey, SessionState};

/// Cooperative per-key lock TTL for load-modify-save cycles.
const LOCK_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Base debounce window before dynamic padding.
    pub base_debounce: Duration,
    /// Sliding TTL; a session in Waiting with no activity is deleted.
    pub session_ttl: Duration,
    /// Inactivity warning fires this long into Waiting.
    pub warning_after: Duration,
    /// Replies within this window keep read receipts immediate.
    pub immediate_read_window: Duration,
    /// History cap for newly created sessions; -1 = unbounded.
    pub max_history: i32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            base_debounce: Duration::from_millis(2_000),
            session_ttl: Duration::from_secs(240),
            warning_after: Duration::from_secs(180),
            immediate_read_window: Duration::from_secs(30),
            max_history: 10,
        }
    }
}

/// One inbound transport message, as the orchestrator sees it.
#[derive(Debug, Clone)]
pub struct Arrival {
    pub key: SessionKey,
    pub text: String,
    pub media: Vec<MediaItem>,
    pub message_id: String,
    pub chat_open: bool,
}

/// A drained debounce buffer, ready for the worker pool.
#[derive(Debug, Clone)]
pub struct FlushJob {
    pub key: SessionKey,
    /// `\n`-joined fragments in arrival order.
    pub text: String,
    pub media: Vec<MediaItem>,
    pub message_ids: Vec<String>,
}

/// The orchestrator's one collaborator, injected at wiring time.
#[async_trait]
pub trait SessionEvents: Send + Sync {
    /// Hand a flush to the worker pool. An admission-rejected error
    /// puts the session back into Debouncing for a later retry.
    fn dispatch_flush(&self, job: FlushJob) -> std::result::Result<(), CharlaError>;

    async fn on_inactivity_warning(&self, key: &SessionKey);

    /// Final expiry or termination removed the session for this channel.
    async fn on_channel_idle(&self, channel_id: &str);

    /// The session is gone; downloaded files may be released.
    async fn on_cleanup_files(&self, entry: &SessionEntry);

    /// Sticky typing: is this sender composing right now?
    fn is_typing(&self, key: &SessionKey) -> bool;

    async fn mark_read(&self, key: &SessionKey, message_ids: &[String]);
}

#[derive(Default)]
struct SessionTimers {
    debounce: Option<JoinHandle<()>>,
    warning: Option<JoinHandle<()>>,
    expiry: Option<JoinHandle<()>>,
}

impl SessionTimers {
    fn abort_all(&mut self) {
        for handle in [
            self.debounce.take(),
            self.warning.take(),
            self.expiry.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

pub struct SessionOrchestrator {
    store: Arc<dyn SessionStore>,
    config: OrchestratorConfig,
    events: OnceLock<Arc<dyn SessionEvents>>,
    timers: DashMap<String, SessionTimers>,
}

impl SessionOrchestrator {
    pub fn new(store: Arc<dyn SessionStore>, config: OrchestratorConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            config,
            events: OnceLock::new(),
            timers: DashMap::new(),
        })
    }

    /// Wire the collaborator. Must happen before the first arrival;
    /// the processor needs the orchestrator first, hence the two-step.
    pub fn set_events(&self, events: Arc<dyn SessionEvents>) {
        if self.events.set(events).is_err() {
            warn!("session events collaborator was already set");
        }
    }

    fn events(&self) -> &Arc<dyn SessionEvents> {
        self.events
            .get()
            .expect("SessionEvents wired before the orchestrator is used")
    }

    /// Entry point for every transport message.
    pub async fn handle_inbound(self: &Arc<Self>, arrival: Arrival) -> Result<()> {
        let key_str = arrival.key.format();
        let locked = self.store.lock(&key_str, LOCK_TTL).await.unwrap_or(false);
        if !locked {
            debug!(key = %key_str, "key lock busy, proceeding best-effort");
        }
        let outcome = self.handle_inbound_inner(arrival).await;
        if locked {
            let _ = self.store.unlock(&key_str).await;
        }
        outcome
    }

    async fn handle_inbound_inner(self: &Arc<Self>, arrival: Arrival) -> Result<()> {
        let key = arrival.key.clone();
        let now = Utc::now();

        let (mut entry, created) = match self.load(&key).await? {
            Some(entry) => (entry, false),
            None => (
                SessionEntry::new(key.clone(), self.config.max_history),
                true,
            ),
        };
        if created {
            debug!(key = %key, "session created");
            self.migrate_stale_identities(&key).await;
        }

        // At-least-once transport: drop duplicates by message id.
        if !arrival.message_id.is_empty()
            && entry.message_ids.iter().any(|id| id == &arrival.message_id)
        {
            debug!(key = %key, message_id = %arrival.message_id, "duplicate message dropped");
            return Ok(());
        }

        let text = arrival.text.trim();
        let text_len = text.chars().count();
        if !text.is_empty() {
            entry.buffer.push(text.to_string());
            entry.fragment_count += 1;
            entry.last_message = text.to_string();
        }
        entry.media.extend(arrival.media);
        if !arrival.message_id.is_empty() {
            entry.message_ids.push(arrival.message_id);
        }
        entry.chat_open = arrival.chat_open;

        match entry.state {
            SessionState::Debouncing => {
                let window = self.window_for(&entry);
                self.arm_debounce(&key, window);
            }
            SessionState::Processing => {
                // Appended only; the reply path re-enters Debouncing
                // with a reading pause once the current turn finishes.
                debug!(key = %key, "arrival while processing, appended");
            }
            SessionState::Waiting => {
                let elapsed = entry
                    .last_reply_at
                    .and_then(|t| now.signed_duration_since(t).to_std().ok())
                    .unwrap_or(Duration::MAX);
                entry.focus = focus::apply(entry.focus, focus::arrival_adjustment(elapsed, text_len));

                entry.state = SessionState::Debouncing;
                self.cancel_waiting_timers(&key);
                let window = self.window_for(&entry);
                self.arm_debounce(&key, window);
            }
        }

        if self.should_mark_read_now(&entry, now) && !entry.message_ids.is_empty() {
            let ids = std::mem::take(&mut entry.message_ids);
            self.events().mark_read(&key, &ids).await;
        }

        self.save(&mut entry).await
    }

    /// Reply path completion. `update` folds the execution outcome
    /// (history turns, focus, mindset, bubble count) into the entry
    /// before the next state is decided.
    pub async fn finish_processing<F>(self: &Arc<Self>, key: &SessionKey, update: F) -> Result<()>
    where
        F: FnOnce(&mut SessionEntry),
    {
        let Some(mut entry) = self.load(key).await? else {
            // Terminated while processing; nothing to resume.
            return Ok(());
        };
        update(&mut entry);
        entry.last_reply_at = Some(Utc::now());

        if entry.buffer.is_empty() {
            entry.state = SessionState::Waiting;
            self.arm_waiting_timers(key);
        } else {
            // Texts arrived during processing: explicit re-entry into
            // Debouncing, paced by how long reading them takes.
            entry.state = SessionState::Debouncing;
            let pause = reading_time(&entry.buffer.join("\n"));
            debug!(key = %key, pause_ms = pause.as_millis() as u64, "re-debouncing after reply");
            self.arm_debounce(key, pause);
        }
        self.save(&mut entry).await
    }

    /// Explicit termination (the AI's `terminate_session` action).
    pub async fn terminate(self: &Arc<Self>, key: &SessionKey) {
        self.delete_session(key, true, "terminated").await;
    }

    pub async fn get(&self, key: &SessionKey) -> Result<Option<SessionEntry>> {
        self.load(key).await
    }

    /// Persist an entry under the sliding TTL.
    pub async fn save(&self, entry: &mut SessionEntry) -> Result<()> {
        entry.expires_at = Some(
            Utc::now()
                + chrono::Duration::from_std(self.config.session_ttl)
                    .unwrap_or_else(|_| chrono::Duration::zero()),
        );
        self.store
            .save(&entry.key.format(), entry.to_json()?, self.config.session_ttl)
            .await?;
        Ok(())
    }

    /// Abort every timer. Sessions themselves stay in the store.
    pub fn shutdown(&self) {
        for mut timers in self.timers.iter_mut() {
            timers.abort_all();
        }
        self.timers.clear();
    }

    // ── timer callbacks ──────────────────────────────────────────────────

    async fn on_debounce_fired(self: Arc<Self>, key: SessionKey) {
        // Sticky typing: don't flush under the sender's fingers.
        if self.events().is_typing(&key) {
            debug!(key = %key, "sender still typing, rescheduling debounce");
            self.arm_debounce(&key, self.config.base_debounce);
            return;
        }

        let Ok(Some(mut entry)) = self.load(&key).await else {
            self.remove_timers(&key);
            return;
        };
        if entry.state != SessionState::Debouncing {
            return;
        }

        let (text, media, message_ids) = entry.drain_buffer();
        if text.is_empty() && media.is_empty() {
            entry.state = SessionState::Waiting;
            self.arm_waiting_timers(&key);
            let _ = self.save(&mut entry).await;
            return;
        }

        entry.state = SessionState::Processing;
        if self.save(&mut entry).await.is_err() {
            return;
        }

        // Flush begins: whatever is still unread gets its receipt now.
        if !message_ids.is_empty() {
            self.events().mark_read(&key, &message_ids).await;
        }

        let job = FlushJob {
            key: key.clone(),
            text: text.clone(),
            media: media.clone(),
            message_ids,
        };
        if let Err(e) = self.events().dispatch_flush(job) {
            warn!(key = %key, error = %e, "flush dispatch rejected, re-debouncing");
            if let Ok(Some(mut entry)) = self.load(&key).await {
                // Drained content goes back as one composite fragment.
                entry.buffer.push(text);
                entry.media = media;
                entry.state = SessionState::Debouncing;
                let _ = self.save(&mut entry).await;
            }
            self.arm_debounce(&key, self.config.base_debounce);
        }
    }

    async fn on_warning_fired(self: Arc<Self>, key: SessionKey) {
        debug!(key = %key, "inactivity warning");
        self.events().on_inactivity_warning(&key).await;
    }

    async fn on_expiry_fired(self: Arc<Self>, key: SessionKey) {
        self.delete_session(&key, true, "expired").await;
    }

    // ── internals ────────────────────────────────────────────────────────

    async fn delete_session(&self, key: &SessionKey, notify_idle: bool, reason: &str) {
        let entry = self.load(key).await.ok().flatten();
        let deleted = self.store.delete(&key.format()).await.unwrap_or(false);
        self.remove_timers(key);

        if !deleted {
            return;
        }
        info!(key = %key, reason, "session deleted");
        if let Some(entry) = entry {
            self.purge_scratch(&entry).await;
            self.events().on_cleanup_files(&entry).await;
        }
        if notify_idle {
            self.events().on_channel_idle(&key.channel_id).await;
        }
    }

    /// A platform rotated the sender id while keeping the chat: evict
    /// stale entries under the same chat prefix. Entries mid-Processing
    /// (a second live device) are left alone.
    async fn migrate_stale_identities(&self, key: &SessionKey) {
        let Ok(keys) = self.store.list(&key.chat_prefix()).await else {
            return;
        };
        for other in keys {
            if other == key.format() {
                continue;
            }
            let Ok(other_key) = SessionKey::parse(&other) else {
                continue;
            };
            match self.load(&other_key).await {
                Ok(Some(entry)) if entry.state != SessionState::Processing => {
                    info!(old = %other, new = %key, "migrating stale sender identity");
                    self.delete_session(&other_key, false, "identity migrated").await;
                }
                _ => {}
            }
        }
    }

    fn window_for(&self, entry: &SessionEntry) -> Duration {
        debounce_duration(
            self.config.base_debounce,
            &entry.last_message,
            &entry.buffer,
            entry.fragment_count,
            entry.focus,
            draw_jitter(),
        )
    }

    fn should_mark_read_now(&self, entry: &SessionEntry, now: chrono::DateTime<Utc>) -> bool {
        if entry.chat_open && entry.state == SessionState::Processing {
            return true;
        }
        if entry.focus >= FOCUS_HIGH {
            return true;
        }
        entry
            .last_reply_at
            .and_then(|t| now.signed_duration_since(t).to_std().ok())
            .map(|elapsed| elapsed < self.config.immediate_read_window)
            .unwrap_or(false)
    }

    fn arm_debounce(self: &Arc<Self>, key: &SessionKey, delay: Duration) {
        let mut timers = self.timers.entry(key.format()).or_default();
        if let Some(handle) = timers.debounce.take() {
            handle.abort();
        }
        let orchestrator = Arc::clone(self);
        let key = key.clone();
        timers.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            orchestrator.on_debounce_fired(key).await;
        }));
    }

    fn arm_waiting_timers(self: &Arc<Self>, key: &SessionKey) {
        let mut timers = self.timers.entry(key.format()).or_default();
        timers.abort_all();

        let orchestrator = Arc::clone(self);
        let warn_key = key.clone();
        let warning_after = self.config.warning_after;
        timers.warning = Some(tokio::spawn(async move {
            tokio::time::sleep(warning_after).await;
            orchestrator.on_warning_fired(warn_key).await;
        }));

        let orchestrator = Arc::clone(self);
        let expiry_key = key.clone();
        let ttl = self.config.session_ttl;
        timers.expiry = Some(tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            orchestrator.on_expiry_fired(expiry_key).await;
        }));
    }

    fn cancel_waiting_timers(&self, key: &SessionKey) {
        if let Some(mut timers) = self.timers.get_mut(&key.format()) {
            if let Some(handle) = timers.warning.take() {
                handle.abort();
            }
            if let Some(handle) = timers.expiry.take() {
                handle.abort();
            }
        }
    }

    fn remove_timers(&self, key: &SessionKey) {
        if let Some((_, mut timers)) = self.timers.remove(&key.format()) {
            timers.abort_all();
        }
    }

    async fn load(&self, key: &SessionKey) -> Result<Option<SessionEntry>> {
        let key_str = key.format();
        match self.store.get(&key_str).await? {
            Some(json) => match SessionEntry::from_json(&key_str, &json) {
                Ok(entry) => Ok(Some(entry)),
                Err(e) => {
                    warn!(key = %key_str, error = %e, "corrupt session entry dropped");
                    let _ = self.store.delete(&key_str).await;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn purge_scratch(&self, entry: &SessionEntry) {
        if let Some(dir) = &entry.scratch_dir {
            if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(dir = %dir.display(), error = %e, "scratch dir cleanup failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use charla_store::MemoryStore;

    use super::*;

    #[derive(Default)]
    struct StubEvents {
        flushes: Mutex<Vec<FlushJob>>,
        typing: AtomicBool,
        reject_dispatch: AtomicBool,
        warnings: AtomicUsize,
        idle_channels: Mutex<Vec<String>>,
        cleanups: AtomicUsize,
        read_ids: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SessionEvents for StubEvents {
        fn dispatch_flush(&self, job: FlushJob) -> std::result::Result<(), CharlaError> {
            if self.reject_dispatch.load(Ordering::SeqCst) {
                return Err(CharlaError::AdmissionRejected {
                    pool: "worker-pool".into(),
                });
            }
            self.flushes.lock().unwrap().push(job);
            Ok(())
        }
        async fn on_inactivity_warning(&self, _key: &SessionKey) {
            self.warnings.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_channel_idle(&self, channel_id: &str) {
            self.idle_channels.lock().unwrap().push(channel_id.to_string());
        }
        async fn on_cleanup_files(&self, _entry: &SessionEntry) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
        fn is_typing(&self, _key: &SessionKey) -> bool {
            self.typing.load(Ordering::SeqCst)
        }
        async fn mark_read(&self, _key: &SessionKey, message_ids: &[String]) {
            self.read_ids
                .lock()
                .unwrap()
                .extend(message_ids.iter().cloned());
        }
    }

    fn setup() -> (Arc<SessionOrchestrator>, Arc<StubEvents>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let orchestrator =
            SessionOrchestrator::new(store.clone(), OrchestratorConfig::default());
        let events = Arc::new(StubEvents::default());
        orchestrator.set_events(events.clone());
        (orchestrator, events, store)
    }

    fn key() -> SessionKey {
        SessionKey::new("wa-main", "5491155551234", "5491155551234@s.net")
    }

    fn arrival(text: &str, message_id: &str) -> Arrival {
        Arrival {
            key: key(),
            text: text.to_string(),
            media: vec![],
            message_id: message_id.to_string(),
            chat_open: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_into_one_flush() {
        let (orchestrator, events, _) = setup();

        orchestrator.handle_inbound(arrival("A", "m1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        orchestrator.handle_inbound(arrival("B", "m2")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        orchestrator.handle_inbound(arrival("C", "m3")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(20)).await;

        let flushes = events.flushes.lock().unwrap();
        assert_eq!(flushes.len(), 1, "burst must coalesce into one flush");
        assert_eq!(flushes[0].text, "A\nB\nC");
        assert_eq!(flushes[0].message_ids, vec!["m1", "m2", "m3"]);
        drop(flushes);

        let entry = orchestrator.get(&key()).await.unwrap().unwrap();
        assert_eq!(entry.state, SessionState::Processing);
    }

    #[tokio::test(start_paused = true)]
    async fn single_flight_and_reading_pause_reflush() {
        let (orchestrator, events, _) = setup();

        orchestrator.handle_inbound(arrival("primera", "m1")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(events.flushes.lock().unwrap().len(), 1);

        // Arrivals while Processing never start a second flight.
        orchestrator.handle_inbound(arrival("D", "m2")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(events.flushes.lock().unwrap().len(), 1);

        // Reply done: queued text re-enters Debouncing on a reading pause.
        orchestrator
            .finish_processing(&key(), |entry| {
                entry.focus = 10;
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(8)).await;

        let flushes = events.flushes.lock().unwrap();
        assert_eq!(flushes.len(), 2);
        assert_eq!(flushes[1].text, "D");
    }

    #[tokio::test(start_paused = true)]
    async fn sticky_typing_defers_flush() {
        let (orchestrator, events, _) = setup();
        events.typing.store(true, Ordering::SeqCst);

        orchestrator.handle_inbound(arrival("hola", "m1")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(events.flushes.lock().unwrap().is_empty(), "typing must defer flush");

        events.typing.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(events.flushes.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_expiry_deletes_once_with_cleanup() {
        let (orchestrator, events, store) = setup();
        let scratch = tempfile::tempdir().unwrap();
        let scratch_path = scratch.keep();

        orchestrator.handle_inbound(arrival("hola", "m1")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;

        let scratch_clone = scratch_path.clone();
        orchestrator
            .finish_processing(&key(), move |entry| {
                entry.scratch_dir = Some(scratch_clone);
            })
            .await
            .unwrap();

        // Warning at 3 min.
        tokio::time::sleep(Duration::from_secs(185)).await;
        assert_eq!(events.warnings.load(Ordering::SeqCst), 1);
        assert!(store.get(&key().format()).await.unwrap().is_some());

        // Final expiry at 4 min.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(store.get(&key().format()).await.unwrap().is_none());
        assert_eq!(events.cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(
            *events.idle_channels.lock().unwrap(),
            vec!["wa-main".to_string()]
        );
        assert!(!scratch_path.exists(), "scratch dir must be purged");
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_deletes_immediately() {
        let (orchestrator, events, store) = setup();
        orchestrator.handle_inbound(arrival("chau", "m1")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;

        orchestrator.terminate(&key()).await;
        assert!(store.get(&key().format()).await.unwrap().is_none());
        assert_eq!(events.cleanups.load(Ordering::SeqCst), 1);

        // A second terminate is a no-op: deleted exactly once.
        orchestrator.terminate(&key()).await;
        assert_eq!(events.cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn admission_rejection_returns_to_debouncing() {
        let (orchestrator, events, _) = setup();
        events.reject_dispatch.store(true, Ordering::SeqCst);

        orchestrator.handle_inbound(arrival("hola", "m1")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(12)).await;

        assert!(events.flushes.lock().unwrap().is_empty());
        let entry = orchestrator.get(&key()).await.unwrap().unwrap();
        assert_eq!(entry.state, SessionState::Debouncing);
        assert!(!entry.buffer.is_empty(), "rejected flush keeps its content");

        events.reject_dispatch.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(15)).await;
        let flushes = events.flushes.lock().unwrap();
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].text, "hola");
    }

    #[tokio::test(start_paused = true)]
    async fn identity_migration_evicts_stale_sender() {
        let (orchestrator, events, store) = setup();

        let old = Arrival {
            key: SessionKey::new("wa-main", "5491155551234", "old-device-id"),
            text: "mensaje viejo".into(),
            media: vec![],
            message_id: "m-old".into(),
            chat_open: false,
        };
        orchestrator.handle_inbound(old).await.unwrap();

        // Same channel+chat, rotated sender id.
        orchestrator.handle_inbound(arrival("hola", "m-new")).await.unwrap();

        assert!(store
            .get("wa-main|5491155551234|old-device-id")
            .await
            .unwrap()
            .is_none());
        assert!(store.get(&key().format()).await.unwrap().is_some());
        assert_eq!(events.cleanups.load(Ordering::SeqCst), 1);
        // Migration eviction is not an idle notification.
        assert!(events.idle_channels.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn quick_reply_in_waiting_raises_focus_and_reads_immediately() {
        let (orchestrator, events, _) = setup();

        orchestrator.handle_inbound(arrival("hola", "m1")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        orchestrator
            .finish_processing(&key(), |entry| entry.fragment_count = 0)
            .await
            .unwrap();

        // Quick follow-up: Δt < 1 min → +30 focus; reply was just sent,
        // so the receipt goes out immediately.
        orchestrator.handle_inbound(arrival("y otra cosa", "m2")).await.unwrap();
        let entry = orchestrator.get(&key()).await.unwrap().unwrap();
        assert_eq!(entry.state, SessionState::Debouncing);
        assert_eq!(entry.focus, 30);
        assert!(events
            .read_ids
            .lock()
            .unwrap()
            .contains(&"m2".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_message_ids_are_dropped() {
        let (orchestrator, _, _) = setup();
        orchestrator.handle_inbound(arrival("hola", "m1")).await.unwrap();
        orchestrator.handle_inbound(arrival("hola", "m1")).await.unwrap();

        let entry = orchestrator.get(&key()).await.unwrap().unwrap();
        assert_eq!(entry.buffer.len(), 1);
        assert_eq!(entry.message_ids.len(), 1);
    }
}
