//! Cache Entry Module
//!
//! Defines the unit of cached state: value, populate function and refresh bookkeeping.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cache::expiration::elapsed_between;
use crate::cache::{CacheValue, EntryMetadata, ExpirationPolicy, FullKey};

/// Future returned by a populate function.
pub type PopulateFuture<V> = Pin<Box<dyn Future<Output = anyhow::Result<V>> + Send>>;

/// Type-erased populate function owned by an entry.
pub type PopulateFn<V> = Arc<dyn Fn() -> PopulateFuture<V> + Send + Sync>;

/// Boxes a caller's populate closure into a [`PopulateFn`].
pub fn populate_fn<V, F, Fut>(populate: F) -> PopulateFn<V>
where
    V: 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
{
    Arc::new(move || Box::pin(populate()) as PopulateFuture<V>)
}

// == Refresh State ==
/// Everything guarded by the entry's refresh lock.
///
/// `value` and `last_refresh_time` always change together.
struct RefreshState<V> {
    value: V,
    last_refresh_time: DateTime<Utc>,
    last_refresh_attempt: Option<DateTime<Utc>>,
    is_refreshing: bool,
    refresh_started_at: Option<DateTime<Utc>>,
    refresh_count: u64,
    refresh_failures: u64,
}

// == Cache Entry ==
/// One cached value together with the function that produces it.
pub struct Entry<V> {
    key: FullKey,
    populate: PopulateFn<V>,
    expiration: ExpirationPolicy,
    refresh_interval: Duration,
    created_at: DateTime<Utc>,
    state: Mutex<RefreshState<V>>,
    /// Cancelled when the entry leaves the store; stops its refresh timer.
    cancel: CancellationToken,
}

impl<V: CacheValue> Entry<V> {
    // == Constructor ==
    /// Creates an entry around an already populated value.
    ///
    /// # Arguments
    /// * `key` - Slot identity, immutable afterwards
    /// * `value` - The fully populated first value
    /// * `populate` - Function re-invoked on refresh
    /// * `expiration` - Store expiration for this entry
    /// * `refresh_interval` - Zero disables refresh
    pub fn new(
        key: FullKey,
        value: V,
        populate: PopulateFn<V>,
        expiration: ExpirationPolicy,
        refresh_interval: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            key,
            populate,
            expiration,
            refresh_interval,
            created_at: now,
            state: Mutex::new(RefreshState {
                value,
                last_refresh_time: now,
                last_refresh_attempt: None,
                is_refreshing: false,
                refresh_started_at: None,
                refresh_count: 0,
                refresh_failures: 0,
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub fn key(&self) -> &FullKey {
        &self.key
    }

    pub fn expiration(&self) -> &ExpirationPolicy {
        &self.expiration
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Returns the last fully committed value.
    pub fn value(&self) -> V {
        self.state.lock().value.clone()
    }

    pub fn is_refreshing(&self) -> bool {
        self.state.lock().is_refreshing
    }

    /// Starts a fresh call of the populate function.
    pub fn populate(&self) -> PopulateFuture<V> {
        (self.populate)()
    }

    // == Refresh Due ==
    /// Whether a refresh should be requested at `now`.
    ///
    /// True when refresh is enabled, the value is at least one interval old
    /// and no refresh is already in flight.
    pub fn refresh_due(&self, now: DateTime<Utc>) -> bool {
        if self.refresh_interval.is_zero() {
            return false;
        }
        let state = self.state.lock();
        !state.is_refreshing
            && elapsed_between(state.last_refresh_time, now) >= self.refresh_interval
    }

    // == Begin Refresh ==
    /// Marks a refresh as in flight, unless one already is or the last attempt
    /// was less than `min_spacing` ago.
    ///
    /// Returns `true` when the caller now owns the refresh and must call
    /// [`Entry::finish_refresh`] exactly once.
    pub fn try_begin_refresh(&self, now: DateTime<Utc>, min_spacing: Duration) -> bool {
        let mut state = self.state.lock();
        if state.is_refreshing {
            return false;
        }
        if let Some(last) = state.last_refresh_attempt {
            if elapsed_between(last, now) < min_spacing {
                return false;
            }
        }
        state.is_refreshing = true;
        state.refresh_started_at = Some(now);
        state.last_refresh_attempt = Some(now);
        true
    }

    // == Finish Refresh ==
    /// Commits the outcome of a refresh started with [`Entry::try_begin_refresh`].
    ///
    /// `None` means the populate call failed and the previous value stays.
    pub fn finish_refresh(&self, refreshed: Option<V>) {
        let mut state = self.state.lock();
        match refreshed {
            Some(value) => {
                state.value = value;
                state.last_refresh_time = Utc::now();
                state.refresh_count += 1;
            }
            None => state.refresh_failures += 1,
        }
        state.is_refreshing = false;
        state.refresh_started_at = None;
    }

    // == Cancellation ==
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs the removal hook: stops any pending refresh timer.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // == Metadata ==
    /// Describes this entry without exposing the populate function.
    pub fn metadata(&self) -> EntryMetadata {
        let state = self.state.lock();
        EntryMetadata {
            key: self.key.key().to_string(),
            group: self.key.group().to_string(),
            type_tag: state.value.type_tag().to_string(),
            size_estimate: state.value.size_estimate(),
            item_count: state.value.item_count(),
            created_at: self.created_at,
            absolute_expiration: self.expiration.absolute,
            sliding_expiration_ms: self.expiration.sliding.map(saturating_millis),
            refresh_interval_ms: saturating_millis(self.refresh_interval),
            is_refreshing: state.is_refreshing,
            refresh_started_at: state.refresh_started_at,
            last_refresh_time: state.last_refresh_time,
            last_refresh_attempt: state.last_refresh_attempt,
            refresh_count: state.refresh_count,
            refresh_failures: state.refresh_failures,
        }
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl<V> fmt::Debug for Entry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("expiration", &self.expiration)
            .field("refresh_interval", &self.refresh_interval)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
