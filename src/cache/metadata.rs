//! Entry Metadata
//!
//! Serializable per-entry descriptors returned by `Cache::get_all_metadata`.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Describes one live entry: identity, shape of its value and refresh state.
#[derive(Debug, Clone, Serialize)]
pub struct EntryMetadata {
    pub key: String,
    pub group: String,
    /// Type tag reported by the value's `CacheValue` impl
    pub type_tag: String,
    /// Approximate size of the value in bytes
    pub size_estimate: usize,
    /// Item count for collection values
    pub item_count: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub absolute_expiration: Option<DateTime<Utc>>,
    pub sliding_expiration_ms: Option<u64>,
    /// Zero when refresh is disabled
    pub refresh_interval_ms: u64,
    pub is_refreshing: bool,
    pub refresh_started_at: Option<DateTime<Utc>>,
    pub last_refresh_time: DateTime<Utc>,
    pub last_refresh_attempt: Option<DateTime<Utc>>,
    pub refresh_count: u64,
    pub refresh_failures: u64,
}
