//! Neighbor connection management
//!
//! The ConnectionManager owns the in-memory neighbor table. It reacts to
//! discovery observations, transport connect/disconnect, the second tick
//! and global connectivity changes, announces nodes exactly once per
//! availability transition, and dispatches transmission jobs to the
//! first registered convergence layer whose protocol the target node
//! advertises.

mod convergence;

pub use convergence::{ConvergenceLayer, Job};

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::data::{BundleId, ClProtocol, Eid, Node, UriState};
use crate::events::{ConnectionState, Event, EventBus, GlobalAction, NodeAction, TimeAction};

/// Errors of the neighbor/dispatch surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// No node matches the destination EID, or the node is not available.
    NeighborNotAvailable,
    /// No registered convergence layer matches the node's protocols.
    ConnectionNotAvailable,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::NeighborNotAvailable => {
                f.write_str("no active connection to this neighbor available")
            }
            NetError::ConnectionNotAvailable => {
                f.write_str("no convergence layer matches the node")
            }
        }
    }
}

impl std::error::Error for NetError {}

/// Owns the neighbor table and the convergence-layer registry.
///
/// Two locks: `nodes` and `layers`. They are never held at the same
/// time, and neither is held while a convergence layer runs.
pub struct ConnectionManager {
    local: Eid,
    autoconnect_interval: u64,
    nodes: Mutex<Vec<Node>>,
    layers: Mutex<Vec<Arc<dyn ConvergenceLayer>>>,
    next_autoconnect: Mutex<u64>,
    bus: EventBus,
    clock: Arc<Clock>,
}

impl ConnectionManager {
    pub fn new(local: Eid, autoconnect_interval: u64, bus: EventBus, clock: Arc<Clock>) -> Self {
        let next_autoconnect = if autoconnect_interval != 0 {
            clock.now() + autoconnect_interval
        } else {
            0
        };
        Self {
            local,
            autoconnect_interval,
            nodes: Mutex::new(Vec::new()),
            layers: Mutex::new(Vec::new()),
            next_autoconnect: Mutex::new(next_autoconnect),
            bus,
            clock,
        }
    }

    /// Deliver one bus event to this component.
    pub fn handle_event(&self, event: &Event) {
        match event {
            Event::Node {
                node,
                action: NodeAction::Available,
            } => {
                if node.connect_immediately() {
                    if let Err(e) = self.open(node) {
                        debug!(peer = %node.eid(), error = %e, "immediate connect skipped");
                    }
                }
            }
            Event::Time {
                action: TimeAction::SecondTick,
                ..
            } => {
                self.check_unavailable();
                self.check_autoconnect();
            }
            Event::Connection { peer, state, node } => match state {
                ConnectionState::Up => self.connection_up(peer, node),
                ConnectionState::Down => self.connection_down(peer, node),
            },
            Event::Global { action } => match action {
                GlobalAction::InternetAvailable => self.check_available(),
                GlobalAction::InternetUnavailable => self.check_unavailable(),
            },
            _ => {}
        }
    }

    /// Clear the convergence-layer registry on teardown.
    pub fn component_down(&self) {
        self.layers.lock().clear();
    }

    // =========================================================================
    // Neighbor table updates
    // =========================================================================

    /// Merge an observation into the table; announce the node once if it
    /// just became available.
    pub fn add_connection(&self, node: &Node) {
        self.upsert(node);
    }

    /// Drop the listed URIs from the node's record. No event on its own;
    /// the next unavailability sweep notices the consequences.
    pub fn remove_connection(&self, node: &Node) {
        let mut nodes = self.nodes.lock();
        if let Some(entry) = nodes.iter_mut().find(|n| n.eid() == node.eid()) {
            entry.remove(node);
            debug!(peer = %entry.eid(), "node attributes removed");
        }
    }

    /// Merge a discovery observation, ignoring observations of ourself.
    pub fn discovered(&self, node: &Node) {
        if node.eid() == &self.local {
            return;
        }
        self.upsert(node);
    }

    /// Alias for [`discovered`](Self::discovered).
    pub fn update_neighbor(&self, node: &Node) {
        self.discovered(node);
    }

    fn upsert(&self, node: &Node) {
        let now = self.clock.now();
        let announce = {
            let mut nodes = self.nodes.lock();
            let index = match nodes.iter().position(|n| n.eid() == node.eid()) {
                Some(i) => {
                    nodes[i].merge(node);
                    debug!(peer = %node.eid(), "node attributes added");
                    i
                }
                None => {
                    nodes.push(node.clone());
                    debug!(peer = %node.eid(), "new node observed");
                    nodes.len() - 1
                }
            };
            let entry = &mut nodes[index];
            if entry.is_available(now) && !entry.is_announced() {
                entry.set_announced(true);
                Some(entry.clone())
            } else {
                None
            }
        };
        if let Some(n) = announce {
            self.bus.publish(Event::Node {
                node: n,
                action: NodeAction::Available,
            });
        }
    }

    fn connection_up(&self, peer: &Eid, node: &Node) {
        let announce = {
            let mut nodes = self.nodes.lock();
            match nodes.iter_mut().find(|n| n.eid() == peer) {
                Some(entry) => {
                    entry.merge(node);
                    debug!(peer = %peer, "node attributes added");
                    None
                }
                None => {
                    let mut entry = node.clone();
                    entry.set_announced(true);
                    debug!(peer = %peer, "new node available");
                    nodes.push(entry.clone());
                    Some(entry)
                }
            }
        };
        if let Some(n) = announce {
            self.bus.publish(Event::Node {
                node: n,
                action: NodeAction::Available,
            });
        }
    }

    fn connection_down(&self, peer: &Eid, node: &Node) {
        let mut nodes = self.nodes.lock();
        if let Some(entry) = nodes.iter_mut().find(|n| n.eid() == peer) {
            entry.remove(node);
            debug!(peer = %peer, "node attributes removed");
        }
    }

    // =========================================================================
    // Convergence layers and dispatch
    // =========================================================================

    /// Register a transport. Idempotent by object identity.
    pub fn add_convergence_layer(&self, cl: Arc<dyn ConvergenceLayer>) {
        let mut layers = self.layers.lock();
        if layers.iter().any(|existing| Arc::ptr_eq(existing, &cl)) {
            return;
        }
        layers.push(cl);
    }

    /// Unregister a transport by object identity.
    pub fn remove_convergence_layer(&self, cl: &Arc<dyn ConvergenceLayer>) {
        self.layers.lock().retain(|existing| !Arc::ptr_eq(existing, cl));
    }

    fn select_layer(&self, node: &Node) -> Option<Arc<dyn ConvergenceLayer>> {
        let now = self.clock.now();
        let layers = self.layers.lock();
        layers
            .iter()
            .find(|cl| node.has(cl.discovery_protocol(), now))
            .cloned()
    }

    /// Ask the first matching convergence layer to connect to the node.
    pub fn open(&self, node: &Node) -> Result<(), NetError> {
        match self.select_layer(node) {
            Some(cl) => {
                cl.open(node);
                Ok(())
            }
            None => Err(NetError::ConnectionNotAvailable),
        }
    }

    /// Enqueue a job on the first matching convergence layer.
    pub fn queue_to(&self, node: &Node, job: Job) -> Result<(), NetError> {
        match self.select_layer(node) {
            Some(cl) => {
                cl.queue(node, job);
                Ok(())
            }
            None => Err(NetError::ConnectionNotAvailable),
        }
    }

    /// Resolve the job's destination against the neighbor table, then
    /// dispatch.
    pub fn queue_job(&self, job: Job) -> Result<(), NetError> {
        trace!(destination = %job.destination, "searching next hop");
        let node = {
            let nodes = self.nodes.lock();
            nodes
                .iter()
                .find(|n| n.eid() == &job.destination)
                .cloned()
        };
        match node {
            Some(n) => {
                debug!(next_hop = %n, "dispatching job");
                self.queue_to(&n, job)
            }
            None => Err(NetError::NeighborNotAvailable),
        }
    }

    /// Shorthand: queue a bundle toward a destination EID.
    pub fn queue(&self, destination: &Eid, bundle: &BundleId) -> Result<(), NetError> {
        self.queue_job(Job::new(destination.clone(), bundle.clone()))
    }

    // =========================================================================
    // Neighbor queries
    // =========================================================================

    /// Snapshot of the currently available nodes.
    pub fn neighbors(&self) -> Vec<Node> {
        let now = self.clock.now();
        let nodes = self.nodes.lock();
        nodes
            .iter()
            .filter(|n| n.is_available(now))
            .cloned()
            .collect()
    }

    /// Look up an available neighbor by EID.
    pub fn neighbor(&self, eid: &Eid) -> Result<Node, NetError> {
        let now = self.clock.now();
        let nodes = self.nodes.lock();
        nodes
            .iter()
            .find(|n| n.eid() == eid && n.is_available(now))
            .cloned()
            .ok_or(NetError::NeighborNotAvailable)
    }

    pub fn is_neighbor(&self, node: &Node) -> bool {
        self.neighbor(node.eid()).is_ok()
    }

    // =========================================================================
    // Periodic bookkeeping
    // =========================================================================

    /// Announce known nodes that became available without an observation
    /// (used when the internet comes back).
    fn check_available(&self) {
        let now = self.clock.now();
        let mut announce = Vec::new();
        {
            let mut nodes = self.nodes.lock();
            for n in nodes.iter_mut() {
                if !n.is_announced() && n.is_available(now) {
                    n.set_announced(true);
                    announce.push(n.clone());
                }
            }
        }
        for n in announce {
            self.bus.publish(Event::Node {
                node: n,
                action: NodeAction::Available,
            });
        }
    }

    /// Withdraw announcements for announced nodes that stopped being
    /// available and drop those whose URI set expired entirely. Nodes
    /// that were never announced are left untouched; a later observation
    /// can still bring them up.
    fn check_unavailable(&self) {
        let now = self.clock.now();
        let mut withdrawn = Vec::new();
        {
            let mut nodes = self.nodes.lock();
            let mut i = 0;
            while i < nodes.len() {
                if !nodes[i].is_announced() {
                    i += 1;
                    continue;
                }
                {
                    let n = &mut nodes[i];
                    if !n.is_available(now) {
                        n.set_announced(false);
                        withdrawn.push(n.clone());
                    }
                }
                if nodes[i].expire(now) {
                    let n = nodes.remove(i);
                    if n.is_announced() {
                        let mut n = n;
                        n.set_announced(false);
                        withdrawn.push(n);
                    }
                    debug!("expired node dropped");
                    continue;
                }
                i += 1;
            }
        }
        for n in withdrawn {
            self.bus.publish(Event::Node {
                node: n,
                action: NodeAction::Unavailable,
            });
        }
    }

    /// Open connections to available nodes without a connected
    /// stream-oriented URI, at most once per configured interval.
    fn check_autoconnect(&self) {
        if self.autoconnect_interval == 0 {
            return;
        }
        let now = self.clock.now();
        {
            let mut next = self.next_autoconnect.lock();
            if now < *next {
                return;
            }
            *next = now + self.autoconnect_interval;
        }
        let candidates: Vec<Node> = {
            let nodes = self.nodes.lock();
            nodes
                .iter()
                .filter(|n| {
                    n.is_available(now) && n.get(UriState::Connected, ClProtocol::Tcp).is_empty()
                })
                .cloned()
                .collect()
        };
        for node in candidates {
            if let Err(e) = self.open(&node) {
                debug!(peer = %node.eid(), error = %e, "autoconnect skipped");
            }
        }
    }
}
