//! Broadcast bus for asynchronous diagnostic messages.
//!
//! Producers publish loose JSON messages (`type` plus identity fields and a
//! `data` payload); the pipeline's worker drains a subscription into the
//! collector. Non-blocking: publishing never awaits, and a slow subscriber
//! lags rather than backpressuring the producer.

use tokio::sync::broadcast;

use serde_json::Value;

/// Default channel capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// Cloneable handle to the diagnostic broadcast channel.
#[derive(Clone, Debug)]
pub struct DiagnosticBus {
    tx: broadcast::Sender<Value>,
}

impl DiagnosticBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with a custom channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a message to all subscribers. Non-blocking.
    ///
    /// Returns the number of subscribers that received it; 0 when nobody is
    /// listening (the message is simply dropped).
    pub fn publish(&self, msg: Value) -> usize {
        self.tx.send(msg).unwrap_or(0)
    }

    /// Subscribe to messages published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for DiagnosticBus {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn publish_with_no_subscribers_drops_silently() {
        let bus = DiagnosticBus::new();
        assert_eq!(bus.publish(json!({"type": "usage.snapshot"})), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_published_messages() {
        let bus = DiagnosticBus::new();
        let mut rx = bus.subscribe();

        let msg = json!({"type": "model.call", "runId": "run-1"});
        assert_eq!(bus.publish(msg.clone()), 1);
        assert_eq!(rx.recv().await.unwrap(), msg);
    }

    #[tokio::test]
    async fn clones_share_the_channel() {
        let bus = DiagnosticBus::new();
        let clone = bus.clone();
        let mut rx = bus.subscribe();

        let _ = clone.publish(json!({"type": "usage.snapshot"}));
        assert!(rx.recv().await.is_ok());
    }
}
