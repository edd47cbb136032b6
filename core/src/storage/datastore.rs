//! Asynchronous blob-on-disk engine
//!
//! One blob per bundle in the working directory; the file name is the
//! content hash of the bundle's canonical key. A single worker task
//! executes queued writes and deletes strictly in submission order and
//! reports every outcome through [`DataStorageListener`]. Writes go to a
//! temp file first and are renamed into place; a stored blob is never
//! rewritten, so its mtime stays the write time.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

/// Content-addressed key of a stored blob: hex blake3 of the bundle's
/// canonical key string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobHash(String);

impl BlobHash {
    pub fn of(key: &str) -> Self {
        Self(hex::encode(blake3::hash(key.as_bytes()).as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors of the blob engine's synchronous read path.
#[derive(Debug)]
pub enum DataError {
    /// The blob does not exist.
    NotAvailable,
    Io(io::Error),
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataError::NotAvailable => f.write_str("data not available"),
            DataError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for DataError {}

impl From<io::Error> for DataError {
    fn from(e: io::Error) -> Self {
        DataError::Io(e)
    }
}

/// Callbacks invoked by the engine worker when queued work completes.
///
/// Implementations must not block and must not fail; they log and update
/// state.
pub trait DataStorageListener: Send + Sync {
    /// A queued write landed on disk.
    fn stored(&self, hash: &BlobHash);
    /// A queued write failed; the blob is not on disk.
    fn store_failed(&self, hash: &BlobHash, error: &io::Error);
    /// A queued delete completed.
    fn removed(&self, hash: &BlobHash);
    /// A queued delete failed.
    fn remove_failed(&self, hash: &BlobHash, error: &io::Error);
}

enum Command {
    Store {
        hash: BlobHash,
        bytes: Vec<u8>,
        slot: tokio::sync::OwnedSemaphorePermit,
    },
    Remove {
        hash: BlobHash,
    },
    /// Marker for [`DataStorage::wait`]: everything queued before it has
    /// been executed once the reply arrives.
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// The asynchronous blob store.
///
/// `store` applies write-buffer backpressure (at most `buffer_limit`
/// writes queued); `remove` is non-blocking and may be called while
/// index locks are held. Reads (`retrieve`) block the caller.
pub struct DataStorage {
    root: PathBuf,
    tx: mpsc::UnboundedSender<Command>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    slots: Arc<Semaphore>,
    listener: Arc<dyn DataStorageListener>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DataStorage {
    /// Open the engine over `root`, creating the directory if needed.
    /// The worker is not started; call [`start`](Self::start).
    pub fn open(
        root: impl AsRef<Path>,
        buffer_limit: usize,
        listener: Arc<dyn DataStorageListener>,
    ) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o700);
            fs::set_permissions(&root, perms)?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            root,
            tx,
            rx: Mutex::new(Some(rx)),
            slots: Arc::new(Semaphore::new(buffer_limit.max(1))),
            listener,
            worker: Mutex::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Feed every persisted blob to `restore`, in directory order.
    /// Returns how many blobs were accepted; blobs the callback rejects
    /// are deleted on the spot. Temp files and foreign names are skipped.
    pub fn iterate_all(
        &self,
        mut restore: impl FnMut(BlobHash, Vec<u8>) -> bool,
    ) -> io::Result<usize> {
        let mut accepted = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.len() != 64 || !name.chars().all(|c| c.is_ascii_hexdigit()) {
                trace!(file = name, "skipping foreign file in workdir");
                continue;
            }
            let bytes = match fs::read(&path) {
                Ok(b) => b,
                Err(e) => {
                    warn!(file = name, error = %e, "unable to read blob, skipping");
                    continue;
                }
            };
            if restore(BlobHash(name.to_string()), bytes) {
                accepted += 1;
            } else {
                warn!(file = name, "unreadable blob removed");
                let _ = fs::remove_file(&path);
            }
        }
        Ok(accepted)
    }

    /// Start the worker task.
    pub fn start(&self) {
        let Some(rx) = self.rx.lock().take() else {
            return;
        };
        let handle = tokio::spawn(run_worker(self.root.clone(), rx, self.listener.clone()));
        *self.worker.lock() = Some(handle);
    }

    /// Queue a write. Waits for one of the write-buffer slots, so callers
    /// must not hold locks across this.
    pub async fn store(&self, hash: BlobHash, bytes: Vec<u8>) {
        let Ok(slot) = self.slots.clone().acquire_owned().await else {
            return;
        };
        let _ = self.tx.send(Command::Store { hash, bytes, slot });
    }

    /// Queue a delete. Non-blocking; the queue is unbounded and ordered
    /// after every previously queued command.
    pub fn remove(&self, hash: BlobHash) {
        let _ = self.tx.send(Command::Remove { hash });
    }

    /// Read a blob plus its `atime - mtime` delta in seconds. Blocks the
    /// caller.
    pub fn retrieve(&self, hash: &BlobHash) -> Result<(Vec<u8>, u64), DataError> {
        let path = self.root.join(hash.as_str());
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(DataError::NotAvailable),
            Err(e) => return Err(DataError::Io(e)),
        };
        let age = fs::metadata(&path)
            .ok()
            .and_then(|m| {
                let accessed = m.accessed().ok()?;
                let modified = m.modified().ok()?;
                accessed.duration_since(modified).ok().map(|d| d.as_secs())
            })
            .unwrap_or(0);
        Ok((bytes, age))
    }

    /// Wait until everything queued so far has been executed.
    pub async fn wait(&self) {
        if self.rx.lock().is_some() {
            // Worker never started; nothing is draining the queue.
            return;
        }
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Signal the worker to stop once it reaches this point in the queue.
    pub fn stop(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    /// Join the worker task.
    pub async fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn run_worker(
    root: PathBuf,
    mut rx: mpsc::UnboundedReceiver<Command>,
    listener: Arc<dyn DataStorageListener>,
) {
    debug!("data storage worker started");
    while let Some(command) = rx.recv().await {
        match command {
            Command::Store { hash, bytes, slot } => {
                match write_blob(&root, &hash, &bytes) {
                    Ok(()) => {
                        trace!(hash = %hash, size = bytes.len(), "blob stored");
                        listener.stored(&hash);
                    }
                    Err(e) => {
                        error!(hash = %hash, error = %e, "blob write failed");
                        listener.store_failed(&hash, &e);
                    }
                }
                drop(slot);
            }
            Command::Remove { hash } => match fs::remove_file(root.join(hash.as_str())) {
                Ok(()) => {
                    trace!(hash = %hash, "blob removed");
                    listener.removed(&hash);
                }
                Err(e) => {
                    warn!(hash = %hash, error = %e, "blob delete failed");
                    listener.remove_failed(&hash, &e);
                }
            },
            Command::Flush(reply) => {
                let _ = reply.send(());
            }
            Command::Shutdown => break,
        }
    }
    debug!("data storage worker stopped");
}

fn write_blob(root: &Path, hash: &BlobHash, bytes: &[u8]) -> io::Result<()> {
    let dest = root.join(hash.as_str());
    let tmp = root.join(format!("{}.tmp.{}", hash.as_str(), std::process::id()));
    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, &dest)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Default)]
    struct LogListener {
        log: Mutex<Vec<String>>,
    }

    impl LogListener {
        fn entries(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    impl DataStorageListener for LogListener {
        fn stored(&self, hash: &BlobHash) {
            self.log.lock().push(format!("stored {}", hash));
        }
        fn store_failed(&self, hash: &BlobHash, _error: &io::Error) {
            self.log.lock().push(format!("store_failed {}", hash));
        }
        fn removed(&self, hash: &BlobHash) {
            self.log.lock().push(format!("removed {}", hash));
        }
        fn remove_failed(&self, hash: &BlobHash, _error: &io::Error) {
            self.log.lock().push(format!("remove_failed {}", hash));
        }
    }

    fn open(dir: &TempDir) -> (DataStorage, Arc<LogListener>) {
        let listener = Arc::new(LogListener::default());
        let storage = DataStorage::open(dir.path().join("blobs"), 4, listener.clone()).unwrap();
        (storage, listener)
    }

    #[tokio::test]
    async fn test_store_then_retrieve() {
        let dir = TempDir::new().unwrap();
        let (storage, listener) = open(&dir);
        storage.start();

        let hash = BlobHash::of("dtn://a 1.0");
        storage.store(hash.clone(), b"payload".to_vec()).await;
        storage.wait().await;

        let (bytes, _age) = storage.retrieve(&hash).unwrap();
        assert_eq!(bytes, b"payload");
        assert_eq!(listener.entries(), vec![format!("stored {}", hash)]);
    }

    #[tokio::test]
    async fn test_store_then_remove_in_order() {
        let dir = TempDir::new().unwrap();
        let (storage, listener) = open(&dir);

        let hash = BlobHash::of("dtn://a 1.0");
        // Queue both before the worker runs: order must be preserved.
        storage.store(hash.clone(), b"payload".to_vec()).await;
        storage.remove(hash.clone());
        storage.start();
        storage.wait().await;

        assert!(matches!(
            storage.retrieve(&hash),
            Err(DataError::NotAvailable)
        ));
        assert_eq!(
            listener.entries(),
            vec![format!("stored {}", hash), format!("removed {}", hash)]
        );
    }

    #[tokio::test]
    async fn test_remove_missing_blob_reports_failure() {
        let dir = TempDir::new().unwrap();
        let (storage, listener) = open(&dir);
        storage.start();

        let hash = BlobHash::of("dtn://missing 1.0");
        storage.remove(hash.clone());
        storage.wait().await;

        assert_eq!(listener.entries(), vec![format!("remove_failed {}", hash)]);
    }

    #[tokio::test]
    async fn test_iterate_all_skips_foreign_files_and_deletes_rejects() {
        let dir = TempDir::new().unwrap();
        let (storage, _listener) = open(&dir);
        storage.start();

        let good = BlobHash::of("dtn://a 1.0");
        let bad = BlobHash::of("dtn://b 1.0");
        storage.store(good.clone(), b"good".to_vec()).await;
        storage.store(bad.clone(), b"bad".to_vec()).await;
        storage.wait().await;
        fs::write(storage.root().join("README"), b"not a blob").unwrap();

        let mut seen = Vec::new();
        let accepted = storage
            .iterate_all(|hash, bytes| {
                seen.push(hash.clone());
                bytes == b"good"
            })
            .unwrap();

        assert_eq!(accepted, 1);
        assert_eq!(seen.len(), 2);
        assert!(storage.retrieve(&good).is_ok());
        assert!(matches!(
            storage.retrieve(&bad),
            Err(DataError::NotAvailable)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_stops_worker() {
        let dir = TempDir::new().unwrap();
        let (storage, _listener) = open(&dir);
        storage.start();

        storage.wait().await;
        storage.stop();
        storage.join().await;
    }

    #[test]
    fn test_blob_hash_is_stable_hex() {
        let a = BlobHash::of("dtn://a 1.0");
        let b = BlobHash::of("dtn://a 1.0");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_ne!(a, BlobHash::of("dtn://a 1.1"));
    }
}
