//! Persistence Module
//!
//! Optional write-through / read-through sidecar for cached values.

mod file;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{CacheValue, Entry, ExpirationPolicy, FullKey};
use crate::error::PersistenceResult;
use crate::tasks::spawn_sweep_task;

pub use file::FileStore;

/// Default interval between sweeps of expired snapshots.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Default upper bound on one serialized snapshot.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

// == Persistent Store ==
/// Narrow interface the engine uses to talk to a durable store.
///
/// Implementations are called from async tasks and should keep each call
/// short.
pub trait PersistentStore<V>: Send + Sync {
    /// Returns the stored value if present and not expired.
    fn load(&self, key: &FullKey) -> PersistenceResult<Option<V>>;

    /// Writes `value` together with its expiration.
    fn save(&self, key: &FullKey, value: &V, expiration: &ExpirationPolicy) -> PersistenceResult<()>;

    /// Deletes whatever is stored for `key`; missing data is not an error.
    fn delete(&self, key: &FullKey) -> PersistenceResult<()>;

    /// Deletes expired data and returns how many items went.
    fn sweep_expired(&self) -> PersistenceResult<usize>;
}

// == Persistence Options ==
/// Settings for the file-backed sidecar.
#[derive(Debug, Clone)]
pub struct PersistenceOptions {
    pub base_directory: PathBuf,
    /// Snapshots serializing larger than this are not written
    pub max_file_size: u64,
    pub sweep_interval: Duration,
}

impl PersistenceOptions {
    pub fn new(base_directory: impl Into<PathBuf>) -> Self {
        Self {
            base_directory: base_directory.into(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }
}

// == Persistence Slot ==
/// The engine's handle on the currently installed store, if any.
///
/// Every failure is logged and swallowed so the in-memory path keeps serving.
pub(crate) struct Persistence<V> {
    store: RwLock<Option<Arc<dyn PersistentStore<V>>>>,
    sweep: Mutex<Option<JoinHandle<()>>>,
    /// Serializes writes against deletes, so a save that passed its
    /// cancellation check finishes before a removal deletes the files.
    writes: Mutex<()>,
}

impl<V: CacheValue> Persistence<V> {
    pub(crate) fn new() -> Self {
        Self {
            store: RwLock::new(None),
            sweep: Mutex::new(None),
            writes: Mutex::new(()),
        }
    }

    /// Installs `store`, replacing any previous one, and starts its sweep task.
    pub(crate) fn install(&self, store: Arc<dyn PersistentStore<V>>, sweep_interval: Duration) {
        let handle = spawn_sweep_task(Arc::clone(&store), sweep_interval);
        *self.store.write() = Some(store);
        if let Some(previous) = self.sweep.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Detaches the store and stops its sweep. Files stay where they are.
    pub(crate) fn disable(&self) -> bool {
        if let Some(handle) = self.sweep.lock().take() {
            handle.abort();
        }
        self.store.write().take().is_some()
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.store.read().is_some()
    }

    fn current(&self) -> Option<Arc<dyn PersistentStore<V>>> {
        self.store.read().clone()
    }

    pub(crate) fn load(&self, key: &FullKey) -> Option<V> {
        let store = self.current()?;
        match store.load(key) {
            Ok(found) => found,
            Err(err) => {
                warn!("Persistence: failed to load {}: {}", key, err);
                None
            }
        }
    }

    /// Writes the entry's current value, unless the entry has already been
    /// removed from the cache.
    ///
    /// Removal cancels the entry before it deletes the files, and both sides
    /// take the write lock, so a removed key never gets its snapshot back.
    pub(crate) fn save(&self, entry: &Entry<V>) {
        let Some(store) = self.current() else {
            return;
        };
        let _writes = self.writes.lock();
        if entry.is_cancelled() {
            debug!("Persistence: {} was removed, skipping write", entry.key());
            return;
        }
        let value = entry.value();
        match store.save(entry.key(), &value, entry.expiration()) {
            Ok(()) => debug!("Persistence: wrote snapshot for {}", entry.key()),
            Err(err) => warn!("Persistence: failed to write {}: {}", entry.key(), err),
        }
    }

    pub(crate) fn delete(&self, key: &FullKey) {
        if let Some(store) = self.current() {
            let _writes = self.writes.lock();
            if let Err(err) = store.delete(key) {
                warn!("Persistence: failed to delete {}: {}", key, err);
            }
        }
    }

    // == Off-thread I/O ==
    /// [`Persistence::load`] on the blocking pool.
    pub(crate) async fn load_off_thread(self: &Arc<Self>, key: &FullKey) -> Option<V> {
        if !self.is_enabled() {
            return None;
        }
        let persistence = Arc::clone(self);
        let key = key.clone();
        match tokio::task::spawn_blocking(move || persistence.load(&key)).await {
            Ok(found) => found,
            Err(err) => {
                warn!("Persistence: load task failed: {}", err);
                None
            }
        }
    }

    /// [`Persistence::save`] on the blocking pool.
    pub(crate) async fn save_off_thread(self: &Arc<Self>, entry: &Arc<Entry<V>>) {
        if !self.is_enabled() {
            return;
        }
        let persistence = Arc::clone(self);
        let entry = Arc::clone(entry);
        if let Err(err) = tokio::task::spawn_blocking(move || persistence.save(&entry)).await {
            warn!("Persistence: save task failed: {}", err);
        }
    }
}
