//! Background Tasks Module
//!
//! Contains the background work a cache runs besides serving lookups.
//!
//! # Tasks
//! - Cleanup: removes expired entries from the memory store
//! - Refresh: re-populates entries off the calling task, with per-entry timers
//! - Sweep: deletes expired snapshots of the persistence sidecar

mod cleanup;
mod refresh;
mod sweep;

pub(crate) use cleanup::spawn_cleanup_task;
pub use refresh::RefreshScheduler;
pub(crate) use sweep::spawn_sweep_task;
