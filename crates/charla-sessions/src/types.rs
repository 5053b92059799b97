use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use charla_core::types::ResourceRef;
use charla_core::{MediaItem, Mindset};

use crate::error::{Result, SessionError};

/// Structured session key: one session per sender per chat per channel.
///
/// Canonical wire form: `channelID|chatID|senderID`. Prefix scans on
/// `channelID|chatID|` find every sender identity in the same chat,
/// which is what identity migration walks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub channel_id: String,
    pub chat_id: String,
    pub sender_id: String,
}

impl SessionKey {
    pub fn new(
        channel_id: impl Into<String>,
        chat_id: impl Into<String>,
        sender_id: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
        }
    }

    /// Canonical wire-format string.
    pub fn format(&self) -> String {
        format!("{}|{}|{}", self.channel_id, self.chat_id, self.sender_id)
    }

    /// Prefix shared by every sender in the same chat.
    pub fn chat_prefix(&self) -> String {
        format!("{}|{}|", self.channel_id, self.chat_id)
    }

    /// Parse a wire-format key. The sender segment may itself contain
    /// pipes (platform ids sometimes do); channel and chat may not.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, '|');
        let channel_id = parts.next().unwrap_or_default();
        let chat_id = parts.next().unwrap_or_default();
        let sender_id = parts.next().unwrap_or_default();

        if channel_id.is_empty() || chat_id.is_empty() || sender_id.is_empty() {
            return Err(SessionError::InvalidKey(format!(
                "expected channel|chat|sender, got: {s}"
            )));
        }
        Ok(Self {
            channel_id: channel_id.to_string(),
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
        })
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

/// Orchestrator state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Accumulating a burst; one debounce timer pending.
    Debouncing,
    /// A handler is dispatched on the worker pool. New arrivals append
    /// but never restart the timer.
    Processing,
    /// Reply sent; warning and expiry timers armed.
    Waiting,
}

/// The hottest entity in the runtime. Serialized to JSON for storage;
/// timers are deliberately NOT part of the value — they live in the
/// orchestrator's local map and are reconstructed from TTLs on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub key: SessionKey,
    pub state: SessionState,

    /// Last inbound text, drives the short-opener debounce heuristic.
    pub last_message: String,

    /// Ring-bounded conversation history in the provider-native
    /// transcript shape. Capped by `max_history` turns; -1 = unbounded.
    #[serde(default)]
    pub history: Vec<serde_json::Value>,

    /// Accumulated text fragments (the debounce buffer).
    #[serde(default)]
    pub buffer: Vec<String>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    /// Unread message ids; cleared when receipts go out.
    #[serde(default)]
    pub message_ids: Vec<String>,
    /// Total text fragments this chat has produced (burst heuristic).
    #[serde(default)]
    pub fragment_count: u32,

    /// Attention proxy, 0..100.
    pub focus: u8,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub last_mindset: Option<Mindset>,
    #[serde(default)]
    pub last_reply_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_bubble_count: u8,

    /// Friendly name → downloaded file.
    #[serde(default)]
    pub resources: HashMap<String, ResourceRef>,
    /// Per-session folder for downloaded media; purged on deletion.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    #[serde(default)]
    pub chat_open: bool,
    #[serde(default)]
    pub language: Option<String>,

    /// History cap in turns; -1 = unbounded.
    pub max_history: i32,
    #[serde(default)]
    pub max_recurring_reminders: u32,

    /// Wall-clock expiry mirrored into the value so a distributed
    /// store can rebuild timers after a failover.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionEntry {
    pub fn new(key: SessionKey, max_history: i32) -> Self {
        Self {
            key,
            state: SessionState::Debouncing,
            last_message: String::new(),
            history: Vec::new(),
            buffer: Vec::new(),
            media: Vec::new(),
            message_ids: Vec::new(),
            fragment_count: 0,
            focus: 0,
            tasks: Vec::new(),
            last_mindset: None,
            last_reply_at: None,
            last_bubble_count: 0,
            resources: HashMap::new(),
            scratch_dir: None,
            chat_open: false,
            language: None,
            max_history,
            max_recurring_reminders: 0,
            expires_at: None,
        }
    }

    /// Append a transcript turn, trimming the front past the cap.
    pub fn push_history(&mut self, turn: serde_json::Value) {
        self.history.push(turn);
        if self.max_history >= 0 {
            let cap = self.max_history as usize;
            if self.history.len() > cap {
                let excess = self.history.len() - cap;
                self.history.drain(..excess);
            }
        }
    }

    /// Drain the debounce buffer into one composite message:
    /// `\n`-joined texts in arrival order, plus media and unread ids.
    pub fn drain_buffer(&mut self) -> (String, Vec<MediaItem>, Vec<String>) {
        let text = self.buffer.join("\n");
        self.buffer.clear();
        let media = std::mem::take(&mut self.media);
        let ids = std::mem::take(&mut self.message_ids);
        (text, media, ids)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(key: &str, json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SessionError::CorruptEntry {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}
