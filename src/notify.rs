use tokio::sync::broadcast;

use crate::model::ChangeEvent;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed reservation changes.
///
/// One channel, all clients: every connected session receives every
/// event and filters locally. Delivery is fire-and-forget — no
/// acknowledgement, no backlog; a slow or absent listener misses the
/// event and catches up through resync.
pub struct NotifyHub {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish a committed change. Must only be called after the write
    /// is durable — a publish failure (no listeners) is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
