use tokio::sync::broadcast;
use tracing::debug;

use crate::codec::Frame;

/// Default channel capacity (frames). Grounded on `td/src/events/bus.rs`'s
/// `EventBus`, generalized from a `TdEvent` payload to a wire `Frame` so the
/// backend "publish socket" (spec §4.2) can be emulated with one broadcast
/// channel per server process.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// The server's backend bus: every inbound frontend frame is re-published
/// here verbatim (spec §4.2 main loop), and every observer task subscribes
/// to receive all of them, filtering by `event_kind` itself.
pub struct EventBus {
    tx: broadcast::Sender<Frame>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: called");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, frame: Frame) {
        debug!(event_kind = %frame.event_kind, client_id = %frame.client_id, "EventBus::publish");
        let _ = self.tx.send(frame);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;

    #[tokio::test]
    async fn subscribers_receive_published_frames() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(Frame::new("c1", "run:start", Value::Nil));
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.event_kind, "run:start");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(Frame::new("c1", "server:ping", Value::Nil));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
