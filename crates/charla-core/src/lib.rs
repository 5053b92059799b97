pub mod config;
pub mod crypto;
pub mod error;
pub mod tz;
pub mod types;
pub mod value;

pub use config::CharlaConfig;
pub use crypto::SecretBox;
pub use error::{CharlaError, Result};
pub use types::{ClientContext, ExecutionCost, MediaItem, MediaState, Mindset, UsageStats};
pub use value::ToolValue;
