//! Test utilities
//!
//! In-crate doubles used by the unit tests: a convergence layer that
//! records calls instead of connecting, an event collector, and bundle
//! builders with fixed timestamps.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::data::{Block, Bundle, ClProtocol, Eid, Node, PrimaryBlock, Priority};
use crate::events::{Event, EventBus, NodeAction};
use crate::net::{ConvergenceLayer, Job};

/// A convergence layer that records every `open` and `queue` call.
#[derive(Debug)]
pub struct RecordingLayer {
    protocol: ClProtocol,
    opened: Mutex<Vec<Eid>>,
    queued: Mutex<Vec<(Eid, Job)>>,
}

impl RecordingLayer {
    pub fn new(protocol: ClProtocol) -> Arc<Self> {
        Arc::new(Self {
            protocol,
            opened: Mutex::new(Vec::new()),
            queued: Mutex::new(Vec::new()),
        })
    }

    /// EIDs passed to `open`, in call order.
    pub fn opened(&self) -> Vec<Eid> {
        self.opened.lock().clone()
    }

    /// (node EID, job) pairs passed to `queue`, in call order.
    pub fn queued(&self) -> Vec<(Eid, Job)> {
        self.queued.lock().clone()
    }
}

impl ConvergenceLayer for RecordingLayer {
    fn discovery_protocol(&self) -> ClProtocol {
        self.protocol
    }

    fn open(&self, node: &Node) {
        self.opened.lock().push(node.eid().clone());
    }

    fn queue(&self, node: &Node, job: Job) {
        self.queued.lock().push((node.eid().clone(), job));
    }
}

/// Collects events published on a bus after the collector was created.
pub struct EventCollector {
    rx: Mutex<broadcast::Receiver<Event>>,
}

impl EventCollector {
    pub fn new(bus: &EventBus) -> Self {
        Self {
            rx: Mutex::new(bus.subscribe()),
        }
    }

    /// Everything published since the last drain.
    pub fn drain(&self) -> Vec<Event> {
        let mut rx = self.rx.lock();
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }
}

/// The node events from a collector, reduced to (eid, action).
pub fn collected_node_events(collector: &EventCollector) -> Vec<(Eid, NodeAction)> {
    collector
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            Event::Node { node, action } => Some((node.eid().clone(), action)),
            _ => None,
        })
        .collect()
}

/// A bundle with explicit creation time, sequence, priority and lifetime.
pub fn bundle_with(
    source: &str,
    timestamp: u64,
    sequence: u64,
    priority: Priority,
    lifetime: u64,
) -> Bundle {
    Bundle {
        primary: PrimaryBlock {
            source: Eid::new(source),
            destination: Eid::new("dtn://dest/app"),
            report_to: Eid::none(),
            custodian: Eid::none(),
            timestamp,
            sequence,
            lifetime,
            priority,
            custody_requested: false,
            fragment: None,
        },
        blocks: vec![Block::Payload(vec![0xAB; 64])],
    }
}

/// A plain normal-priority bundle.
pub fn bundle(source: &str, sequence: u64) -> Bundle {
    bundle_with(source, 1000, sequence, Priority::Normal, 3600)
}
