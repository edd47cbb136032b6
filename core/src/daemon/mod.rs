//! Daemon wiring and lifecycle
//!
//! [`Daemon`] composes the clock, the event bus, the BundleStore and the
//! ConnectionManager, and runs the two background tasks: the event
//! dispatcher (delivering each bus event to both components, serialized)
//! and the 1 Hz tick that drives expiration and auto-connect.

mod config;

pub use config::{default_workdir, DaemonConfig};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::data::Eid;
use crate::events::{Event, EventBus, TimeAction};
use crate::net::ConnectionManager;
use crate::storage::{BundleStore, StorageError};

#[derive(Debug)]
pub enum DaemonError {
    StartFailed(String),
    Storage(StorageError),
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonError::StartFailed(e) => write!(f, "failed to start daemon: {}", e),
            DaemonError::Storage(e) => write!(f, "storage error: {}", e),
        }
    }
}

impl std::error::Error for DaemonError {}

impl From<StorageError> for DaemonError {
    fn from(e: StorageError) -> Self {
        DaemonError::Storage(e)
    }
}

/// A running skiff node core.
pub struct Daemon {
    bus: EventBus,
    clock: Arc<Clock>,
    store: Arc<BundleStore>,
    connections: Arc<ConnectionManager>,
    running: Arc<RwLock<bool>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Daemon {
    /// Bring the node up: restore the store, start the blob engine, and
    /// spawn the dispatcher and tick tasks.
    pub async fn start(config: DaemonConfig) -> Result<Self, DaemonError> {
        let clock = Arc::new(Clock::new());
        let bus = EventBus::new(config.event_channel_capacity);
        let local = Eid::new(config.local_eid.clone());

        let workdir = config
            .workdir
            .clone()
            .or_else(default_workdir)
            .ok_or_else(|| DaemonError::StartFailed("no working directory".to_string()))?;

        let store = Arc::new(BundleStore::open(
            &workdir,
            config.max_storage_bytes,
            config.buffer_limit,
            local.clone(),
            bus.clone(),
        )?);
        store.component_up();

        let connections = Arc::new(ConnectionManager::new(
            local.clone(),
            config.auto_connect_interval_secs,
            bus.clone(),
            clock.clone(),
        ));

        let daemon = Self {
            bus,
            clock,
            store,
            connections,
            running: Arc::new(RwLock::new(true)),
            tasks: Mutex::new(Vec::new()),
        };
        daemon.start_background_tasks().await;

        info!(eid = %local, workdir = %workdir.display(), "daemon started");
        Ok(daemon)
    }

    async fn start_background_tasks(&self) {
        let mut tasks = self.tasks.lock().await;

        // 1. Event dispatcher: one task delivers every bus event to both
        // components, in order. Handlers are synchronous and fast.
        let mut rx = self.bus.subscribe();
        let connections = self.connections.clone();
        let store = self.store.clone();
        let running = self.running.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        connections.handle_event(&event);
                        store.handle_event(&event);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed = missed, "event dispatcher lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                if !*running.read().await {
                    break;
                }
            }
            debug!("event dispatcher stopped");
        }));

        // 2. Second tick.
        let bus = self.bus.clone();
        let clock = self.clock.clone();
        let running = self.running.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.tick().await; // Skip immediate tick
            loop {
                interval.tick().await;
                if !*running.read().await {
                    break;
                }
                bus.publish(Event::Time {
                    action: TimeAction::SecondTick,
                    timestamp: clock.now(),
                });
            }
            debug!("tick task stopped");
        }));
    }

    /// Bring the node down: drain the blob engine, then stop the tasks.
    pub async fn stop(&self) {
        info!("stopping daemon");
        {
            let mut running = self.running.write().await;
            *running = false;
        }

        self.store.component_down().await;
        self.connections.component_down();

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("daemon stopped");
    }

    pub fn store(&self) -> &Arc<BundleStore> {
        &self.store
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ClProtocol, Node, NodeUri, UriState};
    use crate::testing::{bundle, RecordingLayer};
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> DaemonConfig {
        DaemonConfig::for_testing().with_workdir(dir.path().join("bundles"))
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::start(test_config(&dir)).await.unwrap();
        assert!(daemon.store().is_empty());
        daemon.stop().await;
    }

    #[tokio::test]
    async fn test_bundles_survive_restart() {
        let dir = TempDir::new().unwrap();

        let b = bundle("dtn://alpha/app", 1);
        {
            let daemon = Daemon::start(test_config(&dir)).await.unwrap();
            daemon.store().store(b.clone()).await.unwrap();
            daemon.stop().await;
        }

        let daemon = Daemon::start(test_config(&dir)).await.unwrap();
        assert_eq!(daemon.store().count(), 1);
        let got = daemon.store().get(&b.id()).unwrap();
        assert_eq!(got.id(), b.id());
        daemon.stop().await;
    }

    #[tokio::test]
    async fn test_dispatcher_feeds_both_components() {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::start(test_config(&dir)).await.unwrap();

        // Store a bundle that is already past its expiration, then push a
        // tick through the bus: the dispatcher must hand it to the store.
        let b = crate::testing::bundle_with(
            "dtn://alpha/app",
            100,
            1,
            crate::data::Priority::Normal,
            10,
        );
        daemon.store().store(b.clone()).await.unwrap();

        // And a neighbor observation for the connection manager.
        let cl = RecordingLayer::new(ClProtocol::Tcp);
        daemon.connections().add_convergence_layer(cl.clone());
        daemon.connections().add_connection(
            &Node::new(Eid::new("dtn://peer"))
                .with_uri(NodeUri::new(ClProtocol::Tcp, "a", UriState::Discovered)),
        );

        daemon.bus().publish(Event::Time {
            action: TimeAction::SecondTick,
            timestamp: 200,
        });

        // Dispatch happens on another task; poll briefly.
        for _ in 0..50 {
            if daemon.store().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(daemon.store().is_empty());
        assert_eq!(daemon.connections().neighbors().len(), 1);

        daemon.stop().await;
    }
}
