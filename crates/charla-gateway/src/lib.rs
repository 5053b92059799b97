pub mod app;
pub mod helpdesk;
pub mod http;
pub mod processor;
pub mod provider;

pub use app::{build_router, AppState};
