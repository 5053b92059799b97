use serde::{Deserialize, Serialize};

use charla_core::MediaItem;

/// A message received from a transport (WhatsApp-style adapter,
/// helpdesk relay, HTTP webhook).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Logical channel / instance id the message arrived on.
    pub channel_id: String,

    /// Platform-native chat identifier.
    pub chat_id: String,

    /// Platform-native sender identity inside the chat.
    pub sender_id: String,

    /// Platform message id, used for read receipts and de-dup.
    pub message_id: String,

    /// Plain text content. May be empty for media-only messages.
    pub text: String,

    /// Attachments carried with the message.
    #[serde(default)]
    pub media: Vec<MediaItem>,

    /// Whether the sender currently has the chat open, when the
    /// transport reports it.
    #[serde(default)]
    pub chat_open: bool,

    /// ISO-8601 arrival timestamp.
    pub timestamp: String,
}

/// A message to be delivered through a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel_id: String,
    pub chat_id: String,
    pub text: String,
    /// Remote attachment to deliver alongside (or instead of) the text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Routing hint for the attachment: image, audio or video.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_kind: Option<String>,
}

impl OutboundMessage {
    pub fn text(
        channel_id: impl Into<String>,
        chat_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            chat_id: chat_id.into(),
            text: text.into(),
            media_url: None,
            media_kind: None,
        }
    }
}

/// Runtime connection state of a channel adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Fully connected and ready to send/receive.
    Connected,

    /// Attempting to establish or re-establish the connection.
    Connecting,

    /// Cleanly disconnected (not an error condition).
    Disconnected,

    /// An unrecoverable (or pre-retry) error occurred.
    Error(String),
}
