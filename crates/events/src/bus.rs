//! Live tail of a running job for replay clients

use tokio::sync::broadcast;

use crate::types::ProgressEvent;

/// Events a slow observer may fall behind before it starts losing them.
const LIVE_TAIL_CAPACITY: usize = 1000;

/// Broadcast channel for secondary observers of a running job.
///
/// Lagging observers lose events; the caller stream and the session recorder
/// never go through the bus. Replay clients read history from the store and
/// use the bus only for what happens after they subscribed.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(LIVE_TAIL_CAPACITY);
        Self { sender }
    }

    /// Returns how many observers received the event.
    pub fn publish(&self, event: ProgressEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Events published before subscribing are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.observer_count())
            .finish()
    }
}
