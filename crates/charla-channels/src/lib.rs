pub mod channel;
pub mod error;
pub mod manager;
pub mod presence;
pub mod types;

pub use channel::ChannelAdapter;
pub use error::ChannelError;
pub use manager::ChannelManager;
pub use presence::PresenceController;
pub use types::{ChannelStatus, InboundMessage, OutboundMessage};
