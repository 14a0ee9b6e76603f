//! Cascade Cache - an in-process caching layer
//!
//! Keyed storage with populate-on-miss, grouped bulk invalidation, cascading
//! group dependencies, absolute and sliding expiration, non-blocking
//! background refresh and an optional on-disk sidecar.

pub mod cache;
pub mod config;
pub mod error;
pub mod persistence;
pub mod tasks;

pub use cache::{
    Cache, CacheStats, CacheValue, EntryMetadata, ExpirationPolicy, FullKey, GetOptions,
};
pub use config::CacheConfig;
pub use error::{CacheError, PersistenceError, Result};
pub use persistence::{FileStore, PersistenceOptions, PersistentStore};
