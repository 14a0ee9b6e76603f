//! Expiration Cleanup Task
//!
//! Background task that periodically removes expired cache entries.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{Cache, CacheValue};

/// Spawns a background task that periodically purges expired entries.
///
/// The task holds only a weak handle on the cache: it sleeps for the given
/// interval, upgrades, purges and lets go again, and exits once the cache
/// has been dropped.
///
/// # Arguments
/// * `cache` - The cache to sweep; downgraded internally
/// * `cleanup_interval` - Interval between cleanup runs
///
/// # Returns
/// A JoinHandle for the spawned task, aborted on `Cache::shutdown`.
pub(crate) fn spawn_cleanup_task<V: CacheValue>(
    cache: &Cache<V>,
    cleanup_interval: Duration,
) -> JoinHandle<()> {
    let weak = cache.downgrade();

    tokio::spawn(async move {
        info!(
            "Starting expiration cleanup task with interval of {:?}",
            cleanup_interval
        );

        loop {
            // Sleep for the configured interval
            tokio::time::sleep(cleanup_interval).await;

            let Some(cache) = Cache::upgrade(&weak) else {
                debug!("Expiration cleanup: cache dropped, stopping");
                break;
            };
            let removed = cache.purge_expired();
            drop(cache);

            // Log cleanup statistics
            if removed > 0 {
                info!("Expiration cleanup: removed {} expired entries", removed);
            } else {
                debug!("Expiration cleanup: no expired entries found");
            }
        }
    })
}
