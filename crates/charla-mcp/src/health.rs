use tracing::{info, warn};

/// Fire-and-forget health reporting.
///
/// Every validate/call outcome is forwarded here keyed by
/// `(entity, id)`; sinks must never fail the caller.
pub trait HealthSink: Send + Sync {
    fn report(&self, entity: &'static str, id: &str, healthy: bool, detail: Option<&str>);
}

/// Default sink: structured log lines only.
pub struct LogHealthSink;

impl HealthSink for LogHealthSink {
    fn report(&self, entity: &'static str, id: &str, healthy: bool, detail: Option<&str>) {
        if healthy {
            info!(entity, id, "health ok");
        } else {
            warn!(entity, id, detail = detail.unwrap_or(""), "health failure");
        }
    }
}
