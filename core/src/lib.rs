//! Skiff Core
//!
//! Store-and-forward DTN node core: a neighbor connection manager and a
//! persistent bundle store, glued together by an event bus and a shared
//! clock.
//!
//! # Module Structure
//!
//! - `daemon/`: Wiring and lifecycle (Daemon, config)
//! - `net/`: Neighbor table and convergence-layer dispatch
//! - `storage/`: Persistent bundle storage over the blob engine
//! - `data/`: Bundles, endpoint ids, node records
//! - `events`: The typed event bus
//! - `clock`: DTN timestamps
//! - `testing`: Test utilities
//!
//! # Quick Start
//!
//! ```ignore
//! use skiff_core::{Daemon, DaemonConfig};
//!
//! let config = DaemonConfig::new().with_local_eid("dtn://alpha");
//! let daemon = Daemon::start(config).await?;
//!
//! // Routing asks the connection manager to dispatch a stored bundle.
//! daemon.connections().queue(&destination, &bundle_id)?;
//!
//! daemon.stop().await;
//! ```

pub mod clock;
pub mod daemon;
pub mod data;
pub mod events;
pub mod net;
pub mod storage;
pub mod testing;

// Re-export main API types for convenience
pub use clock::Clock;
pub use daemon::{Daemon, DaemonConfig, DaemonError};
pub use data::{Bundle, BundleId, Eid, MetaBundle, Node, NodeUri, Priority};
pub use events::{Event, EventBus};
pub use net::{ConnectionManager, ConvergenceLayer, Job, NetError};
pub use storage::{BloomFilter, BundleFilter, BundleStore, StorageError};
