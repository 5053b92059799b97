use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpError {
    /// The server record is invalid (bad URL scheme, unsupported
    /// transport for the network gateway).
    #[error("validation error: {0}")]
    Validation(String),

    /// The reachability probe or a transport request failed at the
    /// HTTP layer.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered outside the MCP framing.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A server-side error response. `retryable_session` marks the
    /// "session expired / not initialized" class that the initialize
    /// retry loop backs off on.
    #[error("server error: {message}")]
    Server {
        message: String,
        retryable_session: bool,
    },

    /// The named tool is not exposed by the server.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Repository access failed while resolving servers or configs.
    #[error(transparent)]
    Repo(#[from] charla_bots::BotsError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The response stream closed before the reply arrived.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}

impl McpError {
    /// Whether the initialize loop should back off and retry.
    pub fn is_session_class(&self) -> bool {
        match self {
            McpError::Server {
                retryable_session, ..
            } => *retryable_session,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, McpError>;
