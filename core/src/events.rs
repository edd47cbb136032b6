//! Daemon events
//!
//! Everything the components react to or publish travels over one
//! broadcast bus as a single tagged enum; handlers match on the variant
//! they care about. Publishing never blocks and never fails: events
//! raised while a lock is held are delivered asynchronously, and a bus
//! without subscribers simply drops them.

use tokio::sync::broadcast;

use crate::data::{BundleId, Eid, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeAction {
    SecondTick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalAction {
    InternetAvailable,
    InternetUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionReason {
    LifetimeExpired,
}

/// One event on the daemon bus.
#[derive(Debug, Clone)]
pub enum Event {
    /// A neighbor became reachable or unreachable.
    Node { node: Node, action: NodeAction },
    /// Periodic time signal driving expiration and auto-connect.
    Time { action: TimeAction, timestamp: u64 },
    /// A transport connection to a peer went up or down.
    Connection {
        peer: Eid,
        state: ConnectionState,
        node: Node,
    },
    /// Node-wide connectivity changed.
    Global { action: GlobalAction },
    /// A stored bundle was deleted.
    BundleDeleted {
        id: BundleId,
        reason: DeletionReason,
    },
    /// A bundle's lifetime ran out.
    BundleExpired { id: BundleId },
    /// Custody of a bundle was accepted by this node.
    CustodyAccepted { id: BundleId, custodian: Eid },
}

/// Publish/subscribe fan-out for [`Event`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Non-blocking publish; dropped when nobody listens.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
