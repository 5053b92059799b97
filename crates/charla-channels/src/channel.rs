use async_trait::async_trait;

use crate::{
    error::ChannelError,
    types::{ChannelStatus, OutboundMessage},
};

/// Common interface implemented by every channel adapter.
///
/// Implementations must be `Send + Sync` so they can be stored in a
/// `ChannelManager` and driven from multiple Tokio tasks; all methods
/// take `&self` and adapters manage their connection state internally.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Stable lowercase identifier for this channel instance.
    fn id(&self) -> &str;

    /// Establish (or re-establish) the connection to the transport.
    async fn connect(&self) -> Result<(), ChannelError>;

    /// Gracefully close the connection.
    async fn disconnect(&self) -> Result<(), ChannelError>;

    /// Deliver a single outbound message.
    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError>;

    /// Toggle the "composing…" indicator for a chat.
    async fn send_typing(&self, chat_id: &str, typing: bool) -> Result<(), ChannelError>;

    /// Flip the account's visible availability. The socket stays open
    /// either way — this is presence, not connectivity.
    async fn set_online(&self, online: bool) -> Result<(), ChannelError>;

    /// Mark the given message ids as read in a chat.
    async fn mark_read(&self, chat_id: &str, message_ids: &[String]) -> Result<(), ChannelError>;

    /// Current runtime status without blocking.
    fn status(&self) -> ChannelStatus;

    /// Whether the underlying socket is currently open.
    fn is_connected(&self) -> bool {
        self.status() == ChannelStatus::Connected
    }

    /// Default timezone offset of this channel (e.g. the business's
    /// locale), consulted after the client's own.
    fn timezone(&self) -> Option<String> {
        None
    }
}
