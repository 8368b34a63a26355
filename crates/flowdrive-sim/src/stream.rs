//! Broadcast record stream of engine events.
//!
//! Built on `tokio::sync::broadcast`: the engine publishes one
//! [`EngineEvent`] per state transition, and any number of subscribers
//! observe them. Publishing with no subscribers is a no-op.

use flowdrive_types::event::EngineEvent;
use tokio::sync::broadcast;

/// Default channel capacity; generous for single-instance test runs.
const STREAM_CAPACITY: usize = 1024;

/// Multi-consumer stream of engine records.
///
/// Cloning the stream clones the sender, so the engine and its handle
/// clones all publish into the same channel.
pub struct RecordStream {
    sender: broadcast::Sender<EngineEvent>,
}

impl RecordStream {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(STREAM_CAPACITY);
        Self { sender }
    }

    /// New subscriber receiving all events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for RecordStream {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for RecordStream {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
