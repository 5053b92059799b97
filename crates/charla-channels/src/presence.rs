//! Visual-presence lifecycle per channel.
//!
//! Visual-online and socket-open are independent: the controller flips
//! the account to "unavailable" after a quiet period while keeping the
//! socket connected, and re-opens a dropped socket on a self-heal tick
//! unless the channel was deliberately hibernated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use rand::Rng;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::channel::ChannelAdapter;

/// How often the loop wakes to check deadlines and socket health.
const SELF_HEAL_TICK: Duration = Duration::from_secs(30);

/// Night window (local hours) with much shorter offline delays.
const NIGHT_START_HOUR: u32 = 0;
const NIGHT_END_HOUR: u32 = 6;

/// Diagnostics snapshot of a channel's presence state.
#[derive(Debug, Clone)]
pub struct PresenceSnapshot {
    pub visual_online: bool,
    pub socket_connected: bool,
    pub visual_offline_at: Option<DateTime<Utc>>,
    pub deep_hibernate_at: Option<DateTime<Utc>>,
    pub last_seen: DateTime<Utc>,
}

struct PresenceState {
    visual_offline_at: Option<DateTime<Utc>>,
    deep_hibernate_at: Option<DateTime<Utc>>,
    last_seen: DateTime<Utc>,
    offline_deadline: Instant,
}

pub struct PresenceController {
    adapter: Arc<dyn ChannelAdapter>,
    timezone: FixedOffset,
    visual_online: AtomicBool,
    hibernated: AtomicBool,
    state: Mutex<PresenceState>,
}

impl PresenceController {
    pub fn new(adapter: Arc<dyn ChannelAdapter>, timezone: FixedOffset) -> Self {
        let deadline = Instant::now() + offline_delay(local_hour(timezone, Utc::now()));
        Self {
            adapter,
            timezone,
            visual_online: AtomicBool::new(true),
            hibernated: AtomicBool::new(false),
            state: Mutex::new(PresenceState {
                visual_offline_at: None,
                deep_hibernate_at: None,
                last_seen: Utc::now(),
                offline_deadline: deadline,
            }),
        }
    }

    /// Any inbound or outbound activity resets the offline timer and
    /// restores visual presence.
    pub async fn record_activity(&self) {
        let now = Utc::now();
        {
            let mut state = self.state.lock().unwrap();
            state.last_seen = now;
            state.offline_deadline =
                Instant::now() + offline_delay(local_hour(self.timezone, now));
        }
        if !self.visual_online.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.adapter.set_online(true).await {
                warn!(channel = %self.adapter.id(), error = %e, "failed to restore visual presence");
            }
        }
    }

    /// Record a deep-hibernate target. Diagnostics only — the socket is
    /// kept open by default.
    pub fn mark_hibernate_target(&self, at: DateTime<Utc>) {
        self.state.lock().unwrap().deep_hibernate_at = Some(at);
        self.hibernated.store(true, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        let state = self.state.lock().unwrap();
        PresenceSnapshot {
            visual_online: self.visual_online.load(Ordering::SeqCst),
            socket_connected: self.adapter.is_connected(),
            visual_offline_at: state.visual_offline_at,
            deep_hibernate_at: state.deep_hibernate_at,
            last_seen: state.last_seen,
        }
    }

    /// Presence loop: flips visual-offline on deadline, self-heals a
    /// dropped socket, exits on shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(channel = %self.adapter.id(), "presence controller started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(SELF_HEAL_TICK) => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(channel = %self.adapter.id(), "presence controller stopping");
                        break;
                    }
                }
            }
        }
    }

    /// One pass of the two presence duties. Factored out of `run` so it
    /// can be driven directly in tests.
    pub async fn tick(&self) {
        let deadline = self.state.lock().unwrap().offline_deadline;
        if Instant::now() >= deadline && self.visual_online.load(Ordering::SeqCst) {
            self.go_visually_offline().await;
        }

        // Self-heal: the socket dropped without a hibernate decision.
        if !self.adapter.is_connected() && !self.hibernated.load(Ordering::SeqCst) {
            info!(channel = %self.adapter.id(), "socket dropped, self-heal reconnect");
            if let Err(e) = self.adapter.connect().await {
                warn!(channel = %self.adapter.id(), error = %e, "self-heal reconnect failed");
            }
        }
    }

    /// Send "unavailable" to the transport. The socket stays open.
    pub async fn go_visually_offline(&self) {
        if let Err(e) = self.adapter.set_online(false).await {
            warn!(channel = %self.adapter.id(), error = %e, "failed to go visually offline");
            return;
        }
        self.visual_online.store(false, Ordering::SeqCst);
        self.state.lock().unwrap().visual_offline_at = Some(Utc::now());
        info!(channel = %self.adapter.id(), "visually offline, socket stays open");
    }
}

fn local_hour(timezone: FixedOffset, now: DateTime<Utc>) -> u32 {
    now.with_timezone(&timezone).hour()
}

/// Delay before the channel goes visually offline: 15–25 min during the
/// day, 1–3 min inside the night window.
pub fn offline_delay(local_hour: u32) -> Duration {
    let mut rng = rand::thread_rng();
    offline_delay_with(local_hour, &mut rng)
}

fn offline_delay_with(local_hour: u32, rng: &mut impl Rng) -> Duration {
    if (NIGHT_START_HOUR..NIGHT_END_HOUR).contains(&local_hour) {
        Duration::from_secs(rng.gen_range(60..=180))
    } else {
        Duration::from_secs(rng.gen_range(900..=1500))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::error::ChannelError;
    use crate::types::{ChannelStatus, OutboundMessage};

    #[derive(Default)]
    struct StubAdapter {
        online_calls: Mutex<Vec<bool>>,
        connected: AtomicBool,
        reconnects: AtomicU32,
    }

    #[async_trait]
    impl ChannelAdapter for StubAdapter {
        fn id(&self) -> &str {
            "wa-main"
        }
        async fn connect(&self) -> Result<(), ChannelError> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), ChannelError> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn send(&self, _msg: &OutboundMessage) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn send_typing(&self, _chat: &str, _typing: bool) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn set_online(&self, online: bool) -> Result<(), ChannelError> {
            self.online_calls.lock().unwrap().push(online);
            Ok(())
        }
        async fn mark_read(&self, _chat: &str, _ids: &[String]) -> Result<(), ChannelError> {
            Ok(())
        }
        fn status(&self) -> ChannelStatus {
            if self.connected.load(Ordering::SeqCst) {
                ChannelStatus::Connected
            } else {
                ChannelStatus::Disconnected
            }
        }
    }

    #[test]
    fn night_window_shortens_delay() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let night = offline_delay_with(1, &mut rng);
            assert!(night >= Duration::from_secs(60) && night <= Duration::from_secs(180));

            let day = offline_delay_with(14, &mut rng);
            assert!(day >= Duration::from_secs(900) && day <= Duration::from_secs(1500));
        }
    }

    #[tokio::test]
    async fn offline_keeps_socket_open() {
        let adapter = Arc::new(StubAdapter::default());
        adapter.connected.store(true, Ordering::SeqCst);
        let controller = PresenceController::new(
            adapter.clone(),
            FixedOffset::east_opt(0).unwrap(),
        );

        controller.go_visually_offline().await;

        assert_eq!(*adapter.online_calls.lock().unwrap(), vec![false]);
        assert!(adapter.is_connected(), "socket must stay open");
        let snap = controller.snapshot();
        assert!(!snap.visual_online);
        assert!(snap.visual_offline_at.is_some());
    }

    #[tokio::test]
    async fn activity_restores_presence() {
        let adapter = Arc::new(StubAdapter::default());
        adapter.connected.store(true, Ordering::SeqCst);
        let controller =
            PresenceController::new(adapter.clone(), FixedOffset::east_opt(0).unwrap());

        controller.go_visually_offline().await;
        controller.record_activity().await;

        assert_eq!(*adapter.online_calls.lock().unwrap(), vec![false, true]);
        assert!(controller.snapshot().visual_online);
    }

    #[tokio::test]
    async fn self_heal_reconnects_dropped_socket() {
        let adapter = Arc::new(StubAdapter::default());
        let controller =
            PresenceController::new(adapter.clone(), FixedOffset::east_opt(0).unwrap());

        controller.tick().await;
        assert_eq!(adapter.reconnects.load(Ordering::SeqCst), 1);
        assert!(adapter.is_connected());

        // Hibernated channels are left alone.
        adapter.connected.store(false, Ordering::SeqCst);
        controller.mark_hibernate_target(Utc::now());
        controller.tick().await;
        assert_eq!(adapter.reconnects.load(Ordering::SeqCst), 1);
    }
}
