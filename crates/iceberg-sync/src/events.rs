//! Node event bus.
//!
//! Sessions, the dispatcher and the node facade publish what happened;
//! subscribers (UIs, tests, loggers) observe it without polling.

use tokio::sync::broadcast;
use tracing::trace;

use iceberg_core::{Cid, Level, PeerId, Region};

/// Default channel capacity. Slow subscribers lag rather than block.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Events emitted by a running node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// A post, vote or report changed local state.
    PostApplied {
        cid: Cid,
        /// None for local writes.
        from: Option<PeerId>,
    },
    /// A post's effective level moved.
    LevelChanged { cid: Cid, from: Level, to: Level },
    PeerConnected { peer: PeerId },
    PeerDisconnected { peer: PeerId },
    SyncCompleted {
        peer: PeerId,
        region: Region,
        applied: usize,
    },
    SyncFailed {
        peer: PeerId,
        region: Region,
        error: String,
    },
    /// The local store failed; the node stops syncing.
    StoreFailure { error: String },
}

/// Event bus for broadcasting node events.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<NodeEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: NodeEvent) {
        trace!(event = ?event, "emitting node event");
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
