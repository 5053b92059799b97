use thiserror::Error;

/// Runtime-wide error taxonomy.
///
/// Component crates define their own error enums for internal detail;
/// anything that crosses the engine boundary (worker handlers, the HTTP
/// surface, the conversation executor) is folded into this type so the
/// gateway can map it to a stable client-visible code.
#[derive(Debug, Error)]
pub enum CharlaError {
    /// Rejected user input (empty id, unknown provider, malformed key).
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced bot/credential/server/session does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A worker pool queue was full and the job was not enqueued.
    #[error("admission rejected by pool '{pool}'")]
    AdmissionRejected { pool: String },

    /// The AI provider call failed. The conversation is not retried.
    #[error("provider error: {0}")]
    Provider(String),

    /// A tool invocation failed. Converted to `{"error": …}` in the
    /// tool-response turn so the model can observe and retry.
    #[error("tool error: {0}")]
    Tool(String),

    /// A channel adapter could not deliver a message.
    #[error("transport error: {0}")]
    Transport(String),

    /// Ambient context cancellation. Propagated silently, never retried.
    #[error("operation cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CharlaError {
    /// Short stable code string surfaced in HTTP envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            CharlaError::Validation(_) => "VALIDATION_ERROR",
            CharlaError::NotFound { .. } => "NOT_FOUND",
            CharlaError::AdmissionRejected { .. } => "TOO_MANY_REQUESTS",
            CharlaError::Provider(_) => "PROVIDER_ERROR",
            CharlaError::Tool(_) => "TOOL_ERROR",
            CharlaError::Transport(_) => "TRANSPORT_ERROR",
            CharlaError::Cancelled => "CANCELLED",
            CharlaError::Database(_) => "DATABASE_ERROR",
            CharlaError::Config(_) => "CONFIG_ERROR",
            CharlaError::Crypto(_) => "CRYPTO_ERROR",
            CharlaError::Serialization(_) => "SERIALIZATION_ERROR",
            CharlaError::Io(_) => "IO_ERROR",
            CharlaError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the gateway maps this error to.
    ///
    /// Internal detail is never leaked to clients; the recovery layer
    /// sends only the code and a generic message for 500-class errors.
    pub fn http_status(&self) -> u16 {
        match self {
            CharlaError::Validation(_) => 400,
            CharlaError::NotFound { .. } => 404,
            CharlaError::AdmissionRejected { .. } => 429,
            CharlaError::Cancelled => 499,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, CharlaError>;
