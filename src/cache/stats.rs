//! Cache Statistics Module
//!
//! Tracks cache activity: hits, misses, populations, refreshes and removals.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache activity counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Lookups answered from memory
    pub hits: u64,
    /// Lookups that had to populate or load from disk
    pub misses: u64,
    /// Synchronous populate calls that succeeded
    pub populations: u64,
    /// Background refreshes that replaced a value
    pub refreshes: u64,
    /// Background refreshes whose populate call failed
    pub refresh_failures: u64,
    /// Entries dropped by the store's own expiration
    pub expirations: u64,
    /// Entries dropped by explicit or group removal
    pub removals: u64,
    /// Current number of entries in the cache
    pub total_entries: usize,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_population(&mut self) {
        self.populations += 1;
    }

    // == Record Refresh ==
    /// Counts a finished background refresh, successful or not.
    pub fn record_refresh(&mut self, succeeded: bool) {
        if succeeded {
            self.refreshes += 1;
        } else {
            self.refresh_failures += 1;
        }
    }

    pub fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }

    pub fn record_removal(&mut self) {
        self.removals += 1;
    }

    // == Update Entry Count ==
    /// Updates the total entries count.
    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}
