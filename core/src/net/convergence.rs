//! Convergence layer seam
//!
//! Transport adapters plug into the ConnectionManager through this
//! trait. Concrete transports live outside the core; the registry owns
//! them as trait objects and borrows them on dispatch.

use crate::data::{BundleId, ClProtocol, Eid, Node};

/// A transmission job handed to a convergence layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub destination: Eid,
    pub bundle: BundleId,
}

impl Job {
    pub fn new(destination: Eid, bundle: BundleId) -> Self {
        Self {
            destination,
            bundle,
        }
    }
}

/// Transport adapter contract.
///
/// `open` and `queue` must not block; an implementation that needs to do
/// real I/O spawns it.
pub trait ConvergenceLayer: Send + Sync {
    /// Protocol tag matched against node URIs.
    fn discovery_protocol(&self) -> ClProtocol;

    /// Best-effort connect attempt.
    fn open(&self, node: &Node);

    /// Enqueue a job for transmission to the node.
    fn queue(&self, node: &Node, job: Job);
}
