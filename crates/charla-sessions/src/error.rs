use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The provided session key string is malformed.
    ///
    /// Expected format: `channelID|chatID|senderID`
    #[error("invalid session key: {0}")]
    InvalidKey(String),

    /// The store backend failed.
    #[error(transparent)]
    Store(#[from] charla_store::StoreError),

    /// A persisted entry could not be decoded.
    #[error("corrupt session entry for {key}: {reason}")]
    CorruptEntry { key: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
