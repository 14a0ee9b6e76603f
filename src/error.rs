//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Empty key, group or group name passed to an operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The populate function failed on the synchronous (first-miss) path.
    ///
    /// The caller's error is carried through unchanged.
    #[error(transparent)]
    Populate(anyhow::Error),

    /// The persistence sidecar could not be set up
    #[error("Persistence failure: {0}")]
    Persistence(#[from] PersistenceError),
}

// == Persistence Error Enum ==
/// Failures of the optional on-disk sidecar.
///
/// These never reach callers of `get` or `remove`; the in-memory path logs
/// them and carries on.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Snapshot for '{key}' is {size} bytes, above the {max} byte limit")]
    TooLarge { key: String, size: u64, max: u64 },
}

impl CacheError {
    /// Shorthand for building an `InvalidArgument` error.
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        CacheError::InvalidArgument(message.into())
    }
}

// == Result Type Aliases ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Result type used by `PersistentStore` implementations.
pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;
