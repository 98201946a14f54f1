use thankswall_core::EventEnvelope;
use tracing::{debug, warn};

use crate::bridge::BridgeClient;
use crate::ws::broadcast::BroadcastQueue;

/// Where a freshly persisted event goes next.
pub enum Publisher {
    /// Same process owns the subscribers: queue for the local broadcast worker.
    Local(BroadcastQueue),
    /// Subscribers live in a display process: forward over the bridge.
    Bridge(BridgeClient),
}

impl Publisher {
    /// Hand the event to live subscribers. Best effort: a failure comes back
    /// as a warning for the caller to report, never as an error, because the
    /// event is already stored.
    pub async fn publish(&self, envelope: EventEnvelope) -> Option<String> {
        match self {
            Publisher::Local(queue) => {
                if queue.submit(envelope) {
                    debug!("queued for local broadcast");
                    None
                } else {
                    Some("Realtime notification failed: broadcast worker stopped".to_string())
                }
            }
            Publisher::Bridge(bridge) => match bridge.push_event(&envelope).await {
                Ok(ack) => {
                    debug!(endpoint = bridge.endpoint(), status = %ack.status, "published over bridge");
                    None
                }
                Err(e) => {
                    warn!(endpoint = bridge.endpoint(), error = %e, "realtime notification failed");
                    Some(format!("Realtime notification failed: {e}"))
                }
            },
        }
    }
}
