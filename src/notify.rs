use async_trait::async_trait;
use serde_json::Value;

/// Narrow seam to the real-time transport. Implementations deliver a
/// best-effort notification to one recipient; the caller must only invoke
/// this AFTER the underlying record has committed, and must not depend on
/// delivery succeeding.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &str, payload: Value);
}

/// Default transport: records deliveries in the log stream. Stands in for
/// the websocket gateway in tests and single-node deployments.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipient: &str, payload: Value) {
        tracing::debug!(recipient, %payload, "notification dispatched");
    }
}
