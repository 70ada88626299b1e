//! Cross-context change delivery.
//!
//! Local subscribers are called directly by the store. Other contexts
//! sharing the same durable storage (another process, another window)
//! learn about writes through a [`ChangeNotifier`]. [`StateBus`] is the
//! in-process implementation: a tokio broadcast channel that any number of
//! stores publish to and [`listen`](super::StateStore::listen) on.

use tokio::sync::broadcast;
use tracing::trace;

use super::StateChange;

/// Default number of changes buffered per listener.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Transport for changes leaving a store.
pub trait ChangeNotifier: Send + Sync {
    fn publish(&self, change: &StateChange);
}

/// Broadcast bus shared by several [`StateStore`](super::StateStore)s.
#[derive(Debug, Clone)]
pub struct StateBus {
    tx: broadcast::Sender<StateChange>,
}

impl StateBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// A new receiver, to be handed to [`StateStore::listen()`](super::StateStore::listen).
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.tx.subscribe()
    }
}

impl Default for StateBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeNotifier for StateBus {
    fn publish(&self, change: &StateChange) {
        // No listeners is not an error.
        if self.tx.send(change.clone()).is_err() {
            trace!(key = %change.key, "no bus listeners");
        }
    }
}
