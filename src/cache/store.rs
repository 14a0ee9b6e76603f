//! Memory Store Module
//!
//! Underlying keyed storage with absolute and sliding expiration.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::cache::{CacheValue, Entry, FullKey};

// == Slot ==
/// A stored entry plus the access time its sliding expiration runs from.
#[derive(Debug)]
struct Slot<V> {
    entry: Arc<Entry<V>>,
    last_access: Mutex<DateTime<Utc>>,
}

impl<V: CacheValue> Slot<V> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.entry
            .expiration()
            .is_expired(*self.last_access.lock(), now)
    }
}

// == Probe Result ==
/// Outcome of a lookup that does not mutate the map.
#[derive(Debug)]
pub enum Probe<V> {
    Hit(Arc<Entry<V>>),
    /// Present but past its expiration; the caller should evict it.
    Expired,
    Miss,
}

// == Memory Store ==
/// Thread-safe map from full key to entry.
///
/// Lookups take a shared read lock only; the sliding clock of a slot has its
/// own small lock so a hit never needs the write lock.
#[derive(Debug)]
pub struct MemoryStore<V> {
    slots: RwLock<HashMap<FullKey, Slot<V>>>,
}

impl<V: CacheValue> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: CacheValue> MemoryStore<V> {
    // == Constructor ==
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    // == Probe ==
    /// Looks up `key`, resetting its sliding clock on a hit.
    pub fn probe(&self, key: &FullKey) -> Probe<V> {
        let now = Utc::now();
        let slots = self.slots.read();
        match slots.get(key) {
            Some(slot) if slot.is_expired(now) => Probe::Expired,
            Some(slot) => {
                *slot.last_access.lock() = now;
                Probe::Hit(Arc::clone(&slot.entry))
            }
            None => Probe::Miss,
        }
    }

    /// Like [`MemoryStore::probe`] but leaves the sliding clock alone and
    /// folds expired slots into `None`.
    pub fn peek(&self, key: &FullKey) -> Option<Arc<Entry<V>>> {
        let now = Utc::now();
        self.slots
            .read()
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| Arc::clone(&slot.entry))
    }

    // == Insert ==
    /// Stores `entry` under its own key, returning the entry it replaced.
    pub fn insert(&self, entry: Arc<Entry<V>>) -> Option<Arc<Entry<V>>> {
        let key = entry.key().clone();
        let slot = Slot {
            entry,
            last_access: Mutex::new(Utc::now()),
        };
        self.slots.write().insert(key, slot).map(|old| old.entry)
    }

    // == Remove ==
    pub fn remove(&self, key: &FullKey) -> Option<Arc<Entry<V>>> {
        self.slots.write().remove(key).map(|slot| slot.entry)
    }

    /// Removes `key` only if it is still expired under the write lock.
    pub fn remove_if_expired(&self, key: &FullKey) -> Option<Arc<Entry<V>>> {
        let now = Utc::now();
        let mut slots = self.slots.write();
        if slots.get(key).is_some_and(|slot| slot.is_expired(now)) {
            slots.remove(key).map(|slot| slot.entry)
        } else {
            None
        }
    }

    // == Cleanup Expired ==
    /// Removes all expired entries and returns them so their removal hooks
    /// can run.
    pub fn cleanup_expired(&self) -> Vec<Arc<Entry<V>>> {
        let now = Utc::now();
        let mut slots = self.slots.write();
        let expired_keys: Vec<FullKey> = slots
            .iter()
            .filter(|(_, slot)| slot.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        expired_keys
            .iter()
            .filter_map(|key| slots.remove(key).map(|slot| slot.entry))
            .collect()
    }

    /// Empties the store, returning every entry it held.
    pub fn clear(&self) -> Vec<Arc<Entry<V>>> {
        self.slots
            .write()
            .drain()
            .map(|(_, slot)| slot.entry)
            .collect()
    }

    pub fn contains_key(&self, key: &FullKey) -> bool {
        self.slots.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<FullKey> {
        self.slots.read().keys().cloned().collect()
    }

    /// Snapshot of all unexpired entries.
    pub fn entries(&self) -> Vec<Arc<Entry<V>>> {
        let now = Utc::now();
        self.slots
            .read()
            .values()
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| Arc::clone(&slot.entry))
            .collect()
    }

    /// Every stored entry, expired or not.
    pub fn all_entries(&self) -> Vec<Arc<Entry<V>>> {
        self.slots
            .read()
            .values()
            .map(|slot| Arc::clone(&slot.entry))
            .collect()
    }

    // == Length ==
    /// Returns the current number of slots, expired or not.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}
