pub mod db;
pub mod error;
pub mod repo;
pub mod resolver;
pub mod types;

pub use error::BotsError;
pub use repo::BotRepository;
pub use types::{
    Bot, BotMcpConfig, Capabilities, Credential, CredentialKind, McpServer, McpTransportKind,
    Provider, RequiredHeader,
};
