//! Persistent bundle storage
//!
//! The BundleStore accepts, indexes, retrieves and expires bundles,
//! enforces the capacity cap, and coordinates with the asynchronous
//! blob engine in [`datastore`]. All indexes live behind one
//! reader-writer lock; the invariants documented on [`StoreState`] hold
//! whenever that lock is released.

mod bloom;
mod datastore;

pub use bloom::BloomFilter;
pub use datastore::{BlobHash, DataError, DataStorage, DataStorageListener};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::data::{Bundle, BundleId, Eid, MetaBundle};
use crate::events::{DeletionReason, Event, EventBus, TimeAction};

/// Errors of the bundle storage surface.
#[derive(Debug)]
pub enum StorageError {
    /// Lookup or removal missed.
    NoBundleFound,
    /// Accepting the bundle would exceed the capacity cap.
    StorageFull,
    /// A persisted bundle could not be deserialized; it has been evicted.
    BundleLoad(String),
    /// Encoding a bundle for storage failed.
    Serialization(String),
    Io(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NoBundleFound => f.write_str("no such bundle"),
            StorageError::StorageFull => f.write_str("storage capacity exhausted"),
            StorageError::BundleLoad(e) => write!(f, "bundle load failed: {}", e),
            StorageError::Serialization(e) => write!(f, "serialization failed: {}", e),
            StorageError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

/// Selection callback for priority-ordered queries.
pub trait BundleFilter {
    /// Whether this bundle belongs in the result.
    fn should_add(&self, meta: &MetaBundle) -> bool;

    /// Maximum number of results; 0 means unlimited.
    fn limit(&self) -> usize {
        0
    }
}

/// Every index of the store, guarded by one lock.
///
/// Invariants at every point the lock is released:
/// - a meta in `priority_index` is backed by exactly one of `pending`
///   (write still queued) or `by_hash` (write landed);
/// - `used_bytes` equals the sum of `sizes`;
/// - after a processed time tick, nothing in `priority_index` has
///   `expiration <= now`;
/// - no duplicate bundle id across `pending` and disk.
#[derive(Default)]
struct StoreState {
    priority_index: BTreeSet<MetaBundle>,
    by_id: BTreeMap<BundleId, MetaBundle>,
    by_hash: HashMap<BlobHash, BundleId>,
    pending: HashMap<BlobHash, Bundle>,
    sizes: HashMap<BundleId, u64>,
    expiration_index: BTreeSet<(u64, BundleId)>,
    used_bytes: u64,
}

impl StoreState {
    fn unlink(&mut self, id: &BundleId) -> Option<MetaBundle> {
        let meta = self.by_id.remove(id)?;
        self.priority_index.remove(&meta);
        self.expiration_index.remove(&(meta.expiration, id.clone()));
        Some(meta)
    }

    fn free(&mut self, id: &BundleId) {
        if let Some(size) = self.sizes.remove(id) {
            self.used_bytes = self.used_bytes.saturating_sub(size);
        }
    }
}

/// Receives the blob engine's completion callbacks and applies them to
/// the shared indexes. The engine owns this object, not the store, which
/// keeps the ownership between store and engine acyclic.
struct StoreCallbacks {
    state: Arc<RwLock<StoreState>>,
}

impl DataStorageListener for StoreCallbacks {
    fn stored(&self, hash: &BlobHash) {
        let mut state = self.state.write();
        if let Some(bundle) = state.pending.remove(hash) {
            state.by_hash.insert(hash.clone(), bundle.id());
        }
    }

    fn store_failed(&self, hash: &BlobHash, error: &io::Error) {
        error!(hash = %hash, error = %error, "bundle write failed, dropping it");
        let mut state = self.state.write();
        if let Some(bundle) = state.pending.remove(hash) {
            let id = bundle.id();
            state.unlink(&id);
            state.free(&id);
        }
    }

    fn removed(&self, hash: &BlobHash) {
        let mut state = self.state.write();
        if let Some(id) = state.by_hash.remove(hash) {
            state.free(&id);
        }
    }

    fn remove_failed(&self, hash: &BlobHash, error: &io::Error) {
        // Indexes were already updated when the delete was requested.
        warn!(hash = %hash, error = %error, "bundle delete failed");
    }
}

/// Durable, capacity-bounded, priority-ordered bundle storage.
pub struct BundleStore {
    local: Eid,
    max_bytes: u64,
    state: Arc<RwLock<StoreState>>,
    datastore: DataStorage,
    bus: EventBus,
}

impl BundleStore {
    /// Open the store over `workdir` and restore the persisted bundles.
    /// `max_bytes == 0` means unbounded. The engine worker is started by
    /// [`component_up`](Self::component_up).
    pub fn open(
        workdir: impl AsRef<Path>,
        max_bytes: u64,
        buffer_limit: usize,
        local: Eid,
        bus: EventBus,
    ) -> Result<Self, StorageError> {
        let state = Arc::new(RwLock::new(StoreState::default()));
        let callbacks = Arc::new(StoreCallbacks {
            state: state.clone(),
        });
        let datastore = DataStorage::open(workdir, buffer_limit, callbacks)?;
        let store = Self {
            local,
            max_bytes,
            state,
            datastore,
            bus,
        };
        let restored = store.restore()?;
        info!(count = restored, "bundles restored");
        Ok(store)
    }

    fn restore(&self) -> Result<usize, StorageError> {
        let count = self.datastore.iterate_all(|hash, bytes| {
            let bundle = match Bundle::decode(&bytes) {
                Ok(b) => b,
                Err(e) => {
                    error!(hash = %hash, error = %e, "unable to restore bundle");
                    return false;
                }
            };
            let id = bundle.id();
            let size = bytes.len() as u64;

            let mut state = self.state.write();
            if state.by_id.contains_key(&id) {
                warn!(bundle = %id, "duplicate bundle on disk, dropping copy");
                return false;
            }
            if self.max_bytes > 0 && state.used_bytes + size > self.max_bytes {
                warn!(bundle = %id, "no capacity left while restoring, dropping");
                return false;
            }
            state.used_bytes += size;
            let mut meta = MetaBundle::of(&bundle);
            meta.size = size;
            state.by_hash.insert(hash, id.clone());
            state.sizes.insert(id.clone(), size);
            state.expiration_index.insert((meta.expiration, id.clone()));
            state.by_id.insert(id, meta.clone());
            state.priority_index.insert(meta);
            true
        })?;
        Ok(count)
    }

    /// Start the blob engine worker.
    pub fn component_up(&self) {
        self.datastore.start();
    }

    /// Drain queued disk work, signal the worker to stop, join it.
    pub async fn component_down(&self) {
        self.datastore.wait().await;
        self.datastore.stop();
        self.datastore.join().await;
    }

    /// Deliver one bus event to this component.
    pub fn handle_event(&self, event: &Event) {
        if let Event::Time {
            action: TimeAction::SecondTick,
            timestamp,
        } = event
        {
            self.expire(*timestamp);
        }
    }

    /// Accept a bundle: account its size, take custody if requested, and
    /// queue the write. Fails with [`StorageError::StorageFull`] when
    /// over the cap.
    pub async fn store(&self, bundle: Bundle) -> Result<(), StorageError> {
        let mut bundle = bundle;
        let id = bundle.id();
        let hash = BlobHash::of(&id.to_string());

        // Dry-run serialization fixes the accounted size.
        let size = bundle
            .encode()
            .map_err(|e| StorageError::Serialization(e.to_string()))?
            .len() as u64;

        let custody = bundle.primary.custody_requested;
        let bytes;
        {
            let mut state = self.state.write();
            if state.by_id.contains_key(&id) {
                debug!(bundle = %id, "bundle already stored");
                return Ok(());
            }
            if self.max_bytes > 0 && state.used_bytes + size > self.max_bytes {
                return Err(StorageError::StorageFull);
            }
            state.used_bytes += size;

            if custody {
                // The on-disk form carries the rewritten custodian.
                bundle.primary.custodian = self.local.clone();
            }
            bytes = match bundle.encode() {
                Ok(b) => b,
                Err(e) => {
                    state.used_bytes = state.used_bytes.saturating_sub(size);
                    return Err(StorageError::Serialization(e.to_string()));
                }
            };

            let mut meta = MetaBundle::of(&bundle);
            meta.size = size;
            state.pending.insert(hash.clone(), bundle);
            state.sizes.insert(id.clone(), size);
            state.expiration_index.insert((meta.expiration, id.clone()));
            state.by_id.insert(id.clone(), meta.clone());
            state.priority_index.insert(meta);
        }

        if custody {
            debug!(bundle = %id, custodian = %self.local, "custody accepted");
            self.bus.publish(Event::CustodyAccepted {
                id: id.clone(),
                custodian: self.local.clone(),
            });
        }

        // Submitted outside the lock; applies write-buffer backpressure.
        self.datastore.store(hash, bytes).await;
        Ok(())
    }

    /// Return the full bundle. Prefers the not-yet-flushed copy; a blob
    /// read from disk gets its age block advanced by the file's
    /// `atime - mtime` delta. A blob that no longer deserializes is
    /// evicted and reported as [`StorageError::BundleLoad`].
    pub fn get(&self, id: &BundleId) -> Result<Bundle, StorageError> {
        let (hash, pending) = {
            let state = self.state.read();
            let meta = state.by_id.get(id).ok_or(StorageError::NoBundleFound)?;
            let hash = BlobHash::of(&meta.key());
            (hash.clone(), state.pending.get(&hash).cloned())
        };
        if let Some(bundle) = pending {
            return Ok(bundle);
        }

        let (bytes, age) = match self.datastore.retrieve(&hash) {
            Ok(found) => found,
            Err(DataError::NotAvailable) => return Err(StorageError::NoBundleFound),
            Err(DataError::Io(e)) => return Err(StorageError::Io(e.to_string())),
        };

        match Bundle::decode(&bytes) {
            Ok(mut bundle) => {
                if age > 0 {
                    if let Some(age_block) = bundle.age_block_mut() {
                        age_block.add_seconds(age);
                    }
                }
                Ok(bundle)
            }
            Err(e) => {
                error!(bundle = %id, error = %e, "error while loading bundle data");
                let _ = self.remove(id);
                Err(StorageError::BundleLoad(e.to_string()))
            }
        }
    }

    /// Walk the priority index in dispatch order, collecting what the
    /// filter accepts, up to its limit.
    pub fn get_matching(&self, filter: &dyn BundleFilter) -> Vec<MetaBundle> {
        let state = self.state.read();
        let limit = filter.limit();
        let mut result = Vec::new();
        for meta in &state.priority_index {
            if limit != 0 && result.len() >= limit {
                break;
            }
            if filter.should_add(meta) {
                result.push(meta.clone());
            }
        }
        result
    }

    /// Remove a bundle from the indexes and queue the on-disk delete.
    pub fn remove(&self, id: &BundleId) -> Result<(), StorageError> {
        let hash = {
            let mut state = self.state.write();
            let meta = state.unlink(id).ok_or(StorageError::NoBundleFound)?;
            BlobHash::of(&meta.key())
        };
        self.datastore.remove(hash);
        Ok(())
    }

    /// Remove and return the first bundle in dispatch order whose
    /// canonical string the filter contains.
    pub fn remove_matching(&self, filter: &BloomFilter) -> Result<MetaBundle, StorageError> {
        let (meta, hash) = {
            let mut state = self.state.write();
            let found = state
                .priority_index
                .iter()
                .find(|meta| filter.contains(meta.key().as_bytes()))
                .cloned();
            let meta = found.ok_or(StorageError::NoBundleFound)?;
            state.unlink(&meta.id);
            let hash = BlobHash::of(&meta.key());
            (meta, hash)
        };
        self.datastore.remove(hash);
        Ok(meta)
    }

    /// Queue deletion of everything and reset the indexes.
    pub fn clear(&self) {
        let hashes: Vec<BlobHash> = {
            let mut state = self.state.write();
            let hashes = state
                .by_id
                .values()
                .map(|meta| BlobHash::of(&meta.key()))
                .collect();
            state.priority_index.clear();
            state.by_id.clear();
            state.by_hash.clear();
            state.pending.clear();
            state.sizes.clear();
            state.expiration_index.clear();
            state.used_bytes = 0;
            hashes
        };
        for hash in hashes {
            self.datastore.remove(hash);
        }
    }

    pub fn count(&self) -> usize {
        self.state.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().by_id.is_empty()
    }

    /// Bytes currently accounted against the capacity cap.
    pub fn used_bytes(&self) -> u64 {
        self.state.read().used_bytes
    }

    /// Custody was transferred to another node. Whether that means the
    /// bundle can be deleted depends on the routing algorithm, so this
    /// is a hook only.
    pub fn release_custody(&self, _custodian: &Eid, _id: &BundleId) {}

    /// Placeholder kept from the original storage interface.
    pub fn distinct_destinations(&self) -> BTreeSet<Eid> {
        BTreeSet::new()
    }

    fn expire(&self, now: u64) {
        let expired: Vec<MetaBundle> = {
            let mut state = self.state.write();
            let due: Vec<(u64, BundleId)> = state
                .expiration_index
                .iter()
                .take_while(|(expiration, _)| *expiration <= now)
                .cloned()
                .collect();
            let mut metas = Vec::with_capacity(due.len());
            for (_, id) in due {
                if let Some(meta) = state.unlink(&id) {
                    metas.push(meta);
                }
            }
            metas
        };

        for meta in expired {
            let hash = BlobHash::of(&meta.key());
            self.datastore.remove(hash);
            debug!(bundle = %meta.id, "bundle lifetime expired");
            self.bus.publish(Event::BundleDeleted {
                id: meta.id.clone(),
                reason: DeletionReason::LifetimeExpired,
            });
            self.bus.publish(Event::BundleExpired { id: meta.id });
        }
    }
}
