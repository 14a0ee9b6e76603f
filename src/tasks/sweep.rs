//! Persistence Sweep Task
//!
//! Periodically deletes snapshots whose metadata says they have expired.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::persistence::PersistentStore;

/// Spawns the sweep loop for `store`.
///
/// Each sweep runs on the blocking pool since it walks the filesystem. The
/// returned handle is aborted when persistence is disabled or replaced.
pub(crate) fn spawn_sweep_task<V: 'static>(
    store: Arc<dyn PersistentStore<V>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting persistence sweep task every {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            let store = Arc::clone(&store);
            match tokio::task::spawn_blocking(move || store.sweep_expired()).await {
                Ok(Ok(0)) => debug!("Persistence sweep: no expired snapshots"),
                Ok(Ok(removed)) => info!("Persistence sweep: removed {} expired snapshots", removed),
                Ok(Err(err)) => warn!("Persistence sweep failed: {}", err),
                Err(err) => warn!("Persistence sweep task panicked: {}", err),
            }
        }
    })
}
