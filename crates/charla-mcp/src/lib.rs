pub mod client;
pub mod error;
pub mod gateway;
pub mod health;
pub mod transport;
pub mod types;

pub use error::McpError;
pub use gateway::McpGateway;
pub use health::{HealthSink, LogHealthSink};
pub use types::{ToolCallResult, ToolDescriptor};
