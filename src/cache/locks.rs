//! Key Lock Registry
//!
//! Per-key mutual exclusion so that at most one populate runs per key.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::cache::FullKey;

/// Exclusive lock guarding the populate-or-not decision for one key.
///
/// Held across the populate call, hence an async mutex.
pub type KeyLock = Arc<Mutex<()>>;

// == Key Lock Registry ==
/// Lazily created lock handles, one per full key.
///
/// Not synchronized on its own; the engine keeps it behind its structural lock.
/// Removing a handle never releases it: a holder keeps its `Arc` and finishes
/// its critical section, later callers simply get a new handle.
#[derive(Debug, Default)]
pub struct KeyLockRegistry {
    locks: HashMap<FullKey, KeyLock>,
}

impl KeyLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // == Get Or Create ==
    /// Returns the lock for `key`, creating it on first access.
    pub fn get_or_create(&mut self, key: &FullKey) -> KeyLock {
        Arc::clone(
            self.locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    pub fn remove(&mut self, key: &FullKey) -> Option<KeyLock> {
        self.locks.remove(key)
    }

    /// Drops the handle for `key` only if no caller holds a clone of it.
    ///
    /// Clones are only handed out through `get_or_create`, under the same
    /// structural lock as this call, so a count of one means nobody is
    /// waiting on or inside the critical section.
    pub fn remove_if_idle(&mut self, key: &FullKey) -> bool {
        match self.locks.get(key) {
            Some(lock) if Arc::strong_count(lock) == 1 => {
                self.locks.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Whether `lock` is still the registered handle for `key`.
    pub fn is_current(&self, key: &FullKey, lock: &KeyLock) -> bool {
        self.locks.get(key).is_some_and(|current| Arc::ptr_eq(current, lock))
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Drops every handle; used on teardown.
    pub fn clear(&mut self) {
        self.locks.clear();
    }
}
