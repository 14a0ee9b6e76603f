//! Cache Module
//!
//! Provides the cache engine and the building blocks it is made of.

mod engine;
mod entry;
mod expiration;
mod groups;
mod key;
mod locks;
mod metadata;
mod stats;
mod store;
mod value;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use engine::{Cache, GetOptions, MAX_REFRESH_INTERVAL};
pub use entry::{populate_fn, Entry, PopulateFn, PopulateFuture};
pub use expiration::{ExpirationPolicy, MAX_SLIDING_EXPIRATION};
pub use groups::GroupIndex;
pub use key::{FullKey, KEY_SEPARATOR};
pub use locks::{KeyLock, KeyLockRegistry};
pub use metadata::EntryMetadata;
pub use stats::CacheStats;
pub use store::{MemoryStore, Probe};
pub use value::CacheValue;
