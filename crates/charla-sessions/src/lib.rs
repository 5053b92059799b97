pub mod debounce;
pub mod error;
pub mod focus;
pub mod orchestrator;
pub mod types;

pub use error::SessionError;
pub use orchestrator::{Arrival, FlushJob, OrchestratorConfig, SessionEvents, SessionOrchestrator};
pub use types::{SessionEntry, SessionKey, SessionState};
