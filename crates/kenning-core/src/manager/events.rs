//! Index Lifecycle Events
//!
//! A typed channel per event name replaces ad-hoc listener maps: producers
//! are fire-and-forget, consumers subscribe at construction and receive a
//! broadcast stream.

use tokio::sync::broadcast;

/// Broadcast channel depth; slow subscribers drop the oldest events
const EVENT_CAPACITY: usize = 256;

/// Lifecycle notifications emitted by the index manager
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum IndexEvent {
    /// Manager constructed and ready
    Initialized,
    /// Entries accepted for indexing
    ContentIndexed { count: usize },
    /// One write batch committed
    BatchIndexed { batch_index: usize, count: usize },
    /// A mixed batch committed with these counts
    BatchProcessed {
        inserted: usize,
        updated: usize,
        deleted: usize,
    },
    /// A batch failed and was rejected as a unit
    BatchError { message: String },
    /// A non-batch indexing failure
    IndexingError { message: String },
    RebuildStarted,
    RebuildCompleted { entries: usize, duration_ms: u64 },
}

/// Fire-and-forget broadcast bus for index events
pub struct EventBus {
    tx: broadcast::Sender<IndexEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all subsequent events
    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; having no subscribers is not an error
    pub fn emit(&self, event: IndexEvent) {
        let _ = self.tx.send(event);
    }
}
