//! Cache Engine
//!
//! Get-or-populate, removal and group invalidation on top of the memory store,
//! key locks, group index, refresh scheduler and persistence sidecar.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{
    populate_fn, CacheStats, CacheValue, Entry, EntryMetadata, ExpirationPolicy, FullKey,
    GroupIndex, KeyLockRegistry, MemoryStore, Probe, MAX_SLIDING_EXPIRATION,
};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::persistence::{FileStore, Persistence, PersistenceOptions, PersistentStore};
use crate::tasks::{spawn_cleanup_task, RefreshScheduler};

/// Longest accepted refresh interval; longer requests are clamped to it.
pub const MAX_REFRESH_INTERVAL: Duration = MAX_SLIDING_EXPIRATION;

// == Get Options ==
/// Full-control settings for [`Cache::get_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    pub expiration: ExpirationPolicy,
    /// Zero disables background refresh
    pub refresh_interval: Duration,
}

impl GetOptions {
    pub fn new(expiration: ExpirationPolicy) -> Self {
        Self {
            expiration,
            refresh_interval: Duration::ZERO,
        }
    }

    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }
}

// == Registry ==
/// Structures guarded by the single structural lock.
#[derive(Debug, Default)]
struct Registry {
    groups: GroupIndex,
    locks: KeyLockRegistry,
}

pub(crate) struct CacheInner<V> {
    config: CacheConfig,
    store: MemoryStore<V>,
    /// Short critical sections only; never held across a populate call
    registry: Mutex<Registry>,
    scheduler: Arc<RefreshScheduler<V>>,
    persistence: Arc<Persistence<V>>,
    stats: Arc<Mutex<CacheStats>>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl<V> Drop for CacheInner<V> {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup.get_mut().take() {
            handle.abort();
        }
    }
}

// == Cache ==
/// Thread-safe keyed cache with populate-on-miss, groups and background refresh.
///
/// Cloning is cheap and every clone shares the same state, so one instance
/// can be handed to any number of tasks.
pub struct Cache<V> {
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: CacheValue> Cache<V> {
    // == Constructor ==
    /// Creates an empty cache and starts its expiration cleanup task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: CacheConfig) -> Self {
        let persistence = Arc::new(Persistence::new());
        let stats = Arc::new(Mutex::new(CacheStats::new()));
        let scheduler = Arc::new(RefreshScheduler::new(
            config.refresh_retry_spacing,
            Arc::clone(&persistence),
            Arc::clone(&stats),
        ));
        let cleanup_interval = config.cleanup_interval;

        let cache = Self {
            inner: Arc::new(CacheInner {
                config,
                store: MemoryStore::new(),
                registry: Mutex::new(Registry::default()),
                scheduler,
                persistence,
                stats,
                cleanup: Mutex::new(None),
            }),
        };
        let handle = spawn_cleanup_task(&cache, cleanup_interval);
        *cache.inner.cleanup.lock() = Some(handle);
        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub(crate) fn downgrade(&self) -> Weak<CacheInner<V>> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<CacheInner<V>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    // == Get ==
    /// Returns the cached value, populating it with the default sliding
    /// expiration on a miss.
    pub async fn get<F, Fut>(&self, key: &str, group: &str, populate: F) -> Result<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let sliding = self.inner.config.default_sliding_expiration;
        self.get_with(key, group, GetOptions::new(ExpirationPolicy::sliding(sliding)), populate)
            .await
    }

    /// Sliding-expiration variant of [`Cache::get`].
    pub async fn get_sliding<F, Fut>(
        &self,
        key: &str,
        group: &str,
        sliding: Duration,
        populate: F,
    ) -> Result<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        self.get_with(key, group, GetOptions::new(ExpirationPolicy::sliding(sliding)), populate)
            .await
    }

    /// Absolute-expiration variant of [`Cache::get`].
    pub async fn get_absolute<F, Fut>(
        &self,
        key: &str,
        group: &str,
        expires_at: DateTime<Utc>,
        populate: F,
    ) -> Result<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        self.get_with(key, group, GetOptions::new(ExpirationPolicy::absolute(expires_at)), populate)
            .await
    }

    // == Get With ==
    /// Returns the cached value for `(group, key)`, or runs `populate` once
    /// among all concurrent callers and caches the result.
    ///
    /// A hit never waits: if the entry is due for refresh, the refresh is
    /// handed to the scheduler and the current value is returned. A miss
    /// blocks this call for the duration of `populate`; its error comes back
    /// as [`CacheError::Populate`] and nothing is cached.
    ///
    /// # Arguments
    /// * `key` - Non-empty key within the group
    /// * `group` - Non-empty group name
    /// * `options` - Expiration policy and refresh interval for a new entry
    /// * `populate` - Produces the value; kept by the entry for refreshes
    pub async fn get_with<F, Fut>(
        &self,
        key: &str,
        group: &str,
        options: GetOptions,
        populate: F,
    ) -> Result<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let full_key = FullKey::new(group, key)?;

        // Fast path, no key lock
        if let Some(value) = self.lookup(&full_key) {
            return Ok(value);
        }

        let _guard = loop {
            let key_lock = self.inner.registry.lock().locks.get_or_create(&full_key);
            let guard = Arc::clone(&key_lock).lock_owned().await;
            if self.inner.registry.lock().locks.is_current(&full_key, &key_lock) {
                break guard;
            }
            // The registry was torn down while we waited; take the new handle
            drop(guard);
            if let Some(value) = self.lookup(&full_key) {
                return Ok(value);
            }
        };

        // Another caller may have populated while we waited
        if let Some(value) = self.lookup(&full_key) {
            return Ok(value);
        }
        self.inner.stats.lock().record_miss();

        let populate = populate_fn(populate);
        let refresh_interval = self.effective_refresh_interval(options.refresh_interval);

        let (value, recovered) = match self.inner.persistence.load_off_thread(&full_key).await {
            Some(value) => {
                debug!("Recovered {} from persisted snapshot", full_key);
                (value, true)
            }
            None => {
                debug!("Populating {}", full_key);
                let value = populate().await.map_err(CacheError::Populate)?;
                self.inner.stats.lock().record_population();
                (value, false)
            }
        };

        let entry = Arc::new(Entry::new(
            full_key,
            value.clone(),
            populate,
            options.expiration.clamped(),
            refresh_interval,
        ));
        self.install(&entry);
        if !recovered {
            self.inner.persistence.save_off_thread(&entry).await;
        }
        Ok(value)
    }

    fn lookup(&self, key: &FullKey) -> Option<V> {
        match self.inner.store.probe(key) {
            Probe::Hit(entry) => {
                self.inner.stats.lock().record_hit();
                if entry.refresh_due(Utc::now()) {
                    self.inner.scheduler.trigger_refresh(&entry);
                }
                Some(entry.value())
            }
            Probe::Expired => {
                if let Some(entry) = self.inner.store.remove_if_expired(key) {
                    self.inner.stats.lock().record_expirations(1);
                    self.run_removal_hook(&entry);
                }
                None
            }
            Probe::Miss => None,
        }
    }

    fn effective_refresh_interval(&self, requested: Duration) -> Duration {
        if requested < self.inner.config.min_refresh_interval {
            if !requested.is_zero() {
                debug!("Refresh interval {:?} below minimum, refresh disabled", requested);
            }
            Duration::ZERO
        } else if requested > MAX_REFRESH_INTERVAL {
            debug!("Refresh interval {:?} clamped to {:?}", requested, MAX_REFRESH_INTERVAL);
            MAX_REFRESH_INTERVAL
        } else {
            requested
        }
    }

    fn install(&self, entry: &Arc<Entry<V>>) {
        let replaced = {
            let mut registry = self.inner.registry.lock();
            registry.groups.add_member(entry.key());
            self.inner.store.insert(Arc::clone(entry))
        };
        if let Some(old) = replaced {
            old.cancel();
        }
        self.inner.scheduler.arm_timer(entry);
    }

    // == Removal Hook ==
    /// Runs once an entry has left the store: stops its refresh timer and
    /// drops its bookkeeping.
    fn run_removal_hook(&self, entry: &Entry<V>) {
        entry.cancel();
        self.forget_if_absent(entry.key());
    }

    /// Drops group membership and key lock of `key`, unless a newer entry has
    /// been installed under it in the meantime.
    ///
    /// A lock still held by a caller populating the key stays registered, so
    /// later callers queue behind that populate instead of starting another.
    fn forget_if_absent(&self, key: &FullKey) {
        let mut registry = self.inner.registry.lock();
        if !self.inner.store.contains_key(key) {
            registry.groups.remove_member(key);
            registry.locks.remove_if_idle(key);
        }
    }

    fn remove_key(&self, key: &FullKey) -> bool {
        let removed = self.inner.store.remove(key);
        if let Some(entry) = &removed {
            self.inner.stats.lock().record_removal();
            self.run_removal_hook(entry);
            debug!("Removed {}", key);
        } else {
            self.forget_if_absent(key);
        }
        self.inner.persistence.delete(key);
        removed.is_some()
    }

    // == Remove ==
    /// Removes one entry. Removing a missing key is a no-op.
    ///
    /// Returns whether an entry was present.
    pub fn remove(&self, key: &str, group: &str) -> Result<bool> {
        let full_key = FullKey::new(group, key)?;
        Ok(self.remove_key(&full_key))
    }

    /// Removes every entry of `group` whose rendered full key
    /// (`group_key`) contains all of `substrings`.
    pub fn remove_matching_all<S: AsRef<str>>(&self, substrings: &[S], group: &str) -> Result<usize> {
        require_group(group)?;
        let members = self.inner.registry.lock().groups.members(group);

        let mut removed = 0;
        for key in members {
            let rendered = key.to_string();
            let matches = substrings.iter().all(|s| {
                let needle: &str = s.as_ref();
                rendered.contains(needle)
            });
            if matches && self.remove_key(&key) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    // == Remove Group ==
    /// Removes all entries of the given groups and, transitively, of every
    /// group they depend on. Each group is visited once, so cyclic
    /// dependencies terminate.
    ///
    /// Returns the number of entries removed.
    pub fn remove_group<S: AsRef<str>>(&self, groups: &[S]) -> Result<usize> {
        for group in groups {
            require_group(group.as_ref())?;
        }

        let (cascade, members) = {
            let mut registry = self.inner.registry.lock();
            let cascade = registry.groups.cascade(groups);
            let members: Vec<FullKey> = cascade
                .iter()
                .flat_map(|group| registry.groups.remove_group(group))
                .collect();
            (cascade, members)
        };
        debug!("Removing groups {:?} ({} keys)", cascade, members.len());

        let mut removed = 0;
        for key in &members {
            if self.remove_key(key) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Removes every entry.
    pub fn remove_all(&self) -> usize {
        self.remove_where(|_| true)
    }

    /// Removes every entry whose group is not listed in `keep`.
    pub fn remove_all_except<S: AsRef<str>>(&self, keep: &[S]) -> usize {
        let keep: HashSet<&str> = keep.iter().map(|group| group.as_ref()).collect();
        self.remove_where(|key| !keep.contains(key.group()))
    }

    fn remove_where(&self, predicate: impl Fn(&FullKey) -> bool) -> usize {
        let mut keys: HashSet<FullKey> = self.inner.store.keys().into_iter().collect();
        {
            let registry = self.inner.registry.lock();
            for group in registry.groups.group_names() {
                keys.extend(registry.groups.members(&group));
            }
        }

        let mut removed = 0;
        for key in keys.iter().filter(|key| predicate(key)) {
            if self.remove_key(key) {
                removed += 1;
            }
        }
        removed
    }

    // == Dependencies ==
    /// Makes removal of `group` cascade to `dependent_groups`.
    ///
    /// Replaces any earlier list for `group`; an empty list clears it.
    pub fn set_dependencies<S: AsRef<str>>(&self, group: &str, dependent_groups: &[S]) -> Result<()> {
        require_group(group)?;
        let mut dependencies = Vec::with_capacity(dependent_groups.len());
        for dependent in dependent_groups {
            let dependent: &str = dependent.as_ref();
            require_group(dependent)?;
            dependencies.push(dependent.to_string());
        }
        self.inner
            .registry
            .lock()
            .groups
            .set_dependencies(group, dependencies);
        Ok(())
    }

    pub fn dependencies(&self, group: &str) -> Vec<String> {
        self.inner.registry.lock().groups.dependencies(group)
    }

    // == Inspection ==
    /// Live values of `group`, keyed by their key within the group.
    pub fn get_all_by_group(&self, group: &str) -> Result<HashMap<String, V>> {
        require_group(group)?;
        let members = self.inner.registry.lock().groups.members(group);

        Ok(members
            .iter()
            .filter_map(|key| self.inner.store.peek(key))
            .map(|entry| (entry.key().key().to_string(), entry.value()))
            .collect())
    }

    /// Descriptors of all live entries, ordered by group then key.
    pub fn get_all_metadata(&self) -> Vec<EntryMetadata> {
        let mut metadata: Vec<EntryMetadata> = self
            .inner
            .store
            .entries()
            .iter()
            .map(|entry| entry.metadata())
            .collect();
        metadata.sort_by(|a, b| (&a.group, &a.key).cmp(&(&b.group, &b.key)));
        metadata
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.inner.stats.lock().clone();
        stats.set_total_entries(self.inner.store.len());
        stats
    }

    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    // == Maintenance ==
    /// Removes expired entries and runs their removal hooks.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let expired = self.inner.store.cleanup_expired();
        for entry in &expired {
            self.run_removal_hook(entry);
        }
        self.inner.stats.lock().record_expirations(expired.len());
        expired.len()
    }

    /// Drops every in-memory entry while leaving persisted snapshots alone.
    pub fn clear_memory(&self) -> usize {
        let cleared = self.inner.store.clear();
        for entry in &cleared {
            self.run_removal_hook(entry);
        }
        debug!("Cleared {} entries from memory", cleared.len());
        cleared.len()
    }

    // == Persistence ==
    /// Installs a custom persistent store and starts its sweep task.
    pub fn set_persistent_store(&self, store: Arc<dyn PersistentStore<V>>, sweep_interval: Duration) {
        self.inner.persistence.install(store, sweep_interval);
        info!("Persistence enabled, sweeping every {:?}", sweep_interval);
    }

    /// Detaches the persistence sidecar. Files already written stay on disk.
    pub fn disable_persistence(&self) {
        if self.inner.persistence.disable() {
            info!("Persistence disabled");
        }
    }

    pub fn is_persistence_enabled(&self) -> bool {
        self.inner.persistence.is_enabled()
    }

    // == Shutdown ==
    /// Stops all background work: the cleanup and sweep tasks and every
    /// refresh timer, and drops all key locks.
    ///
    /// Cached values stay readable afterwards.
    pub fn shutdown(&self) {
        if let Some(handle) = self.inner.cleanup.lock().take() {
            handle.abort();
        }
        self.inner.persistence.disable();
        for entry in self.inner.store.all_entries() {
            entry.cancel();
        }
        self.inner.registry.lock().locks.clear();
        info!("Cache shut down");
    }
}

impl<V> Cache<V>
where
    V: CacheValue + Serialize + DeserializeOwned,
{
    /// Enables the file-backed sidecar under `options.base_directory`.
    ///
    /// From now on every populate and refresh writes a snapshot, every
    /// removal deletes it, and misses are served from unexpired snapshots
    /// before populate is called.
    pub fn enable_persistence(&self, options: PersistenceOptions) -> Result<()> {
        let store: FileStore<V> = FileStore::open(&options)?;
        self.set_persistent_store(Arc::new(store), options.sweep_interval);
        Ok(())
    }
}

fn require_group(group: &str) -> Result<()> {
    if group.is_empty() {
        Err(CacheError::invalid("group must not be empty"))
    } else {
        Ok(())
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_cache() -> Cache<String> {
        Cache::new(CacheConfig::default())
    }

    fn key(group: &str, name: &str) -> FullKey {
        FullKey::new(group, name).unwrap()
    }

    #[tokio::test]
    async fn test_get_registers_group_and_lock() {
        let cache = test_cache();
        cache
            .get("k", "g", || async { anyhow::Ok("v".to_string()) })
            .await
            .unwrap();

        let registry = cache.inner.registry.lock();
        assert_eq!(registry.groups.members("g"), vec![key("g", "k")]);
        assert_eq!(registry.locks.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_drops_bookkeeping() {
        let cache = test_cache();
        cache
            .get("k", "g", || async { anyhow::Ok("v".to_string()) })
            .await
            .unwrap();

        assert!(cache.remove("k", "g").unwrap());
        assert!(!cache.remove("k", "g").unwrap());

        let registry = cache.inner.registry.lock();
        assert!(registry.groups.members("g").is_empty());
        assert!(registry.locks.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_interval_below_minimum_is_disabled() {
        let cache = test_cache();
        let options = GetOptions::new(ExpirationPolicy::never())
            .with_refresh_interval(Duration::from_millis(500));
        cache
            .get_with("k", "g", options, || async { anyhow::Ok("v".to_string()) })
            .await
            .unwrap();

        let metadata = cache.get_all_metadata();
        assert_eq!(metadata[0].refresh_interval_ms, 0);
    }

    #[tokio::test]
    async fn test_refresh_interval_above_maximum_is_clamped() {
        let cache = test_cache();
        let options = GetOptions::new(ExpirationPolicy::never())
            .with_refresh_interval(Duration::MAX);
        cache
            .get_with("k", "g", options, || async { anyhow::Ok("v".to_string()) })
            .await
            .unwrap();

        let metadata = cache.get_all_metadata();
        assert_eq!(
            metadata[0].refresh_interval_ms,
            MAX_REFRESH_INTERVAL.as_millis() as u64
        );
    }

    #[tokio::test]
    async fn test_remove_during_populate_keeps_key_lock() {
        let cache = test_cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = {
            let cache = cache.clone();
            let counter = calls.clone();
            tokio::spawn(async move {
                cache
                    .get("k", "g", move || {
                        let counter = counter.clone();
                        async move {
                            tokio::time::sleep(Duration::from_millis(200)).await;
                            counter.fetch_add(1, Ordering::SeqCst);
                            anyhow::Ok("first".to_string())
                        }
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!cache.remove("k", "g").unwrap());
        assert_eq!(cache.inner.registry.lock().locks.len(), 1);

        let counter = calls.clone();
        let second = cache
            .get("k", "g", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok("second".to_string())
                }
            })
            .await
            .unwrap();

        assert_eq!(first.await.unwrap().unwrap(), "first");
        assert_eq!(second, "first");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_after_shutdown_uses_fresh_lock() {
        let cache = test_cache();
        cache.shutdown();

        let value = cache
            .get("k", "g", || async { anyhow::Ok("v".to_string()) })
            .await
            .unwrap();
        assert_eq!(value, "v");
        assert_eq!(cache.inner.registry.lock().locks.len(), 1);
    }

    #[tokio::test]
    async fn test_removal_cancels_refresh_timer() {
        let cache = test_cache();
        let options = GetOptions::new(ExpirationPolicy::never())
            .with_refresh_interval(Duration::from_secs(5));
        cache
            .get_with("k", "g", options, || async { anyhow::Ok("v".to_string()) })
            .await
            .unwrap();

        let entry = cache.inner.store.peek(&key("g", "k")).unwrap();
        cache.remove("k", "g").unwrap();
        assert!(entry.is_cancelled());
    }

    #[tokio::test]
    async fn test_lazy_expiration_runs_removal_hook() {
        let cache = test_cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let soon = Utc::now() + chrono::Duration::milliseconds(50);

        let counter = calls.clone();
        cache
            .get_absolute("k", "g", soon, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok("v".to_string())
                }
            })
            .await
            .unwrap();
        let first = cache.inner.store.peek(&key("g", "k")).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        let counter = calls.clone();
        cache
            .get("k", "g", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok("v2".to_string())
                }
            })
            .await
            .unwrap();

        assert!(first.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test]
    async fn test_shutdown_disposes_locks_and_timers() {
        let cache = test_cache();
        let options = GetOptions::new(ExpirationPolicy::never())
            .with_refresh_interval(Duration::from_secs(5));
        cache
            .get_with("k", "g", options, || async { anyhow::Ok("v".to_string()) })
            .await
            .unwrap();
        let entry = cache.inner.store.peek(&key("g", "k")).unwrap();

        cache.shutdown();

        assert!(entry.is_cancelled());
        assert!(cache.inner.registry.lock().locks.is_empty());
        assert!(cache.inner.cleanup.lock().is_none());
        // Values remain readable
        assert_eq!(
            cache
                .get("k", "g", || async { anyhow::Ok("other".to_string()) })
                .await
                .unwrap(),
            "v"
        );
    }
}
