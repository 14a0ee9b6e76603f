//! Refresh Scheduler
//!
//! Runs populate functions off the calling task, at most one per entry at a
//! time, and drives the periodic per-entry refresh timers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::cache::{CacheStats, CacheValue, Entry};
use crate::persistence::Persistence;

// == Refresh Scheduler ==
/// Background re-population shared by the engine and every entry timer.
pub struct RefreshScheduler<V> {
    retry_spacing: Duration,
    persistence: Arc<Persistence<V>>,
    stats: Arc<Mutex<CacheStats>>,
}

impl<V: CacheValue> RefreshScheduler<V> {
    pub(crate) fn new(
        retry_spacing: Duration,
        persistence: Arc<Persistence<V>>,
        stats: Arc<Mutex<CacheStats>>,
    ) -> Self {
        Self {
            retry_spacing,
            persistence,
            stats,
        }
    }

    // == Trigger Refresh ==
    /// Starts a background refresh of `entry` unless one is in flight or the
    /// previous attempt is too recent.
    ///
    /// Never waits for the populate call. Returns whether a refresh was
    /// started. Must be called from within a Tokio runtime.
    pub fn trigger_refresh(&self, entry: &Arc<Entry<V>>) -> bool {
        if !entry.try_begin_refresh(Utc::now(), self.retry_spacing) {
            return false;
        }

        let entry = Arc::clone(entry);
        let persistence = Arc::clone(&self.persistence);
        let stats = Arc::clone(&self.stats);
        debug!("Refresh: started for {}", entry.key());

        tokio::spawn(async move {
            // The populate call runs outside every lock
            let outcome = entry.populate().await;
            let succeeded = outcome.is_ok();
            match outcome {
                Ok(value) => entry.finish_refresh(Some(value)),
                Err(err) => {
                    warn!("Refresh: populate failed for {}, keeping last value: {:#}", entry.key(), err);
                    entry.finish_refresh(None);
                }
            }
            stats.lock().record_refresh(succeeded);

            // Skipped inside the write lock if the entry was removed meanwhile
            if succeeded {
                persistence.save_off_thread(&entry).await;
            }
        });
        true
    }

    // == Arm Timer ==
    /// Starts the periodic timer of `entry`, ticking every refresh interval.
    ///
    /// The timer stops once the entry's cancellation token fires or the entry
    /// itself has been dropped. Returns `None` when refresh is disabled.
    pub fn arm_timer(self: &Arc<Self>, entry: &Arc<Entry<V>>) -> Option<JoinHandle<()>> {
        let period = entry.refresh_interval();
        if period.is_zero() {
            return None;
        }

        let scheduler = Arc::clone(self);
        let token = entry.cancel_token().clone();
        let weak = Arc::downgrade(entry);
        let key = entry.key().clone();

        let Some(start) = Instant::now().checked_add(period) else {
            warn!("Refresh interval {:?} for {} out of range, timer not armed", period, key);
            return None;
        };

        Some(tokio::spawn(async move {
            let mut ticker = interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(entry) = weak.upgrade() else {
                    break;
                };
                if entry.is_cancelled() {
                    break;
                }
                scheduler.trigger_refresh(&entry);
            }
            debug!("Refresh timer for {} disposed", key);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{populate_fn, ExpirationPolicy, FullKey};
    use crate::persistence::{FileStore, PersistenceOptions};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scheduler(retry_spacing: Duration) -> Arc<RefreshScheduler<String>> {
        Arc::new(RefreshScheduler::new(
            retry_spacing,
            Arc::new(Persistence::new()),
            Arc::new(Mutex::new(CacheStats::new())),
        ))
    }

    fn counting_entry(
        counter: Arc<AtomicUsize>,
        delay: Duration,
        refresh_interval: Duration,
    ) -> Arc<Entry<String>> {
        Arc::new(Entry::new(
            FullKey::new("group", "key").unwrap(),
            "v0".to_string(),
            populate_fn(move || {
                let counter = counter.clone();
                async move {
                    tokio::time::sleep(delay).await;
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    anyhow::Ok(format!("v{}", n))
                }
            }),
            ExpirationPolicy::never(),
            refresh_interval,
        ))
    }

    #[tokio::test]
    async fn test_trigger_refresh_replaces_value() {
        let counter = Arc::new(AtomicUsize::new(0));
        let entry = counting_entry(counter.clone(), Duration::ZERO, Duration::from_secs(60));
        let scheduler = scheduler(Duration::ZERO);

        assert!(scheduler.trigger_refresh(&entry));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(entry.value(), "v1");
        assert!(!entry.is_refreshing());
        assert_eq!(scheduler.stats.lock().refreshes, 1);
    }

    #[tokio::test]
    async fn test_trigger_refresh_deduplicates_in_flight() {
        let counter = Arc::new(AtomicUsize::new(0));
        let entry = counting_entry(counter.clone(), Duration::from_millis(100), Duration::from_secs(60));
        let scheduler = scheduler(Duration::ZERO);

        assert!(scheduler.trigger_refresh(&entry));
        assert!(!scheduler.trigger_refresh(&entry));
        assert!(!scheduler.trigger_refresh(&entry));
        assert_eq!(entry.value(), "v0");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(entry.value(), "v1");
    }

    #[tokio::test]
    async fn test_retry_spacing_throttles_back_to_back_refreshes() {
        let counter = Arc::new(AtomicUsize::new(0));
        let entry = counting_entry(counter.clone(), Duration::ZERO, Duration::from_secs(60));
        let scheduler = scheduler(Duration::from_secs(1));

        assert!(scheduler.trigger_refresh(&entry));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!scheduler.trigger_refresh(&entry));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_value() {
        let entry = Arc::new(Entry::new(
            FullKey::new("group", "key").unwrap(),
            "good".to_string(),
            populate_fn(|| async { Err::<String, _>(anyhow::anyhow!("source down")) }),
            ExpirationPolicy::never(),
            Duration::from_secs(60),
        ));
        let scheduler = scheduler(Duration::ZERO);

        assert!(scheduler.trigger_refresh(&entry));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(entry.value(), "good");
        assert!(!entry.is_refreshing());
        assert_eq!(scheduler.stats.lock().refresh_failures, 1);
    }

    #[tokio::test]
    async fn test_timer_refreshes_periodically() {
        let counter = Arc::new(AtomicUsize::new(0));
        let entry = counting_entry(counter.clone(), Duration::ZERO, Duration::from_millis(100));
        let scheduler = scheduler(Duration::ZERO);

        let handle = scheduler.arm_timer(&entry).unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;

        assert!(counter.load(Ordering::SeqCst) >= 2);
        assert_ne!(entry.value(), "v0");

        entry.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished(), "Timer should stop after cancellation");
    }

    #[tokio::test]
    async fn test_timer_stops_when_entry_dropped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let entry = counting_entry(counter.clone(), Duration::ZERO, Duration::from_millis(50));
        let scheduler = scheduler(Duration::ZERO);

        let handle = scheduler.arm_timer(&entry).unwrap();
        drop(entry);
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(handle.is_finished());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timer_not_armed_for_out_of_range_interval() {
        let entry = counting_entry(Arc::new(AtomicUsize::new(0)), Duration::ZERO, Duration::MAX);
        assert!(scheduler(Duration::ZERO).arm_timer(&entry).is_none());
    }

    #[tokio::test]
    async fn test_refresh_finishing_after_removal_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let persistence: Arc<Persistence<String>> = Arc::new(Persistence::new());
        let store = FileStore::open(&PersistenceOptions::new(dir.path())).unwrap();
        persistence.install(Arc::new(store), Duration::from_secs(3600));
        let scheduler = Arc::new(RefreshScheduler::new(
            Duration::ZERO,
            Arc::clone(&persistence),
            Arc::new(Mutex::new(CacheStats::new())),
        ));

        let counter = Arc::new(AtomicUsize::new(0));
        let entry = counting_entry(counter.clone(), Duration::from_millis(100), Duration::from_secs(60));
        assert!(scheduler.trigger_refresh(&entry));

        // Removal order used by the engine: cancel, then delete
        tokio::time::sleep(Duration::from_millis(30)).await;
        entry.cancel();
        persistence.delete(entry.key());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_timer_not_armed_without_interval() {
        let entry = counting_entry(Arc::new(AtomicUsize::new(0)), Duration::ZERO, Duration::ZERO);
        assert!(scheduler(Duration::ZERO).arm_timer(&entry).is_none());
    }
}
