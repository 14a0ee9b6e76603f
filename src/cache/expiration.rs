//! Expiration Policy Module
//!
//! Absolute and sliding expiration as understood by the memory store.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Upper bound for sliding expiration: one year minus one minute.
pub const MAX_SLIDING_EXPIRATION: Duration = Duration::from_secs(365 * 24 * 60 * 60 - 60);

// == Expiration Policy ==
/// When a cached entry stops being served.
///
/// `absolute: None` is the "never" sentinel; it is not a timestamp and cannot
/// collide with one. Both limits may be set, in which case whichever is hit
/// first wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpirationPolicy {
    pub absolute: Option<DateTime<Utc>>,
    pub sliding: Option<Duration>,
}

impl ExpirationPolicy {
    /// Never expires on its own.
    pub fn never() -> Self {
        Self::default()
    }

    /// Expires at a fixed wall-clock instant.
    pub fn absolute(at: DateTime<Utc>) -> Self {
        Self {
            absolute: Some(at),
            sliding: None,
        }
    }

    /// Expires once `window` has passed without an access.
    pub fn sliding(window: Duration) -> Self {
        Self {
            absolute: None,
            sliding: Some(window),
        }
        .clamped()
    }

    pub fn both(at: DateTime<Utc>, window: Duration) -> Self {
        Self {
            absolute: Some(at),
            sliding: Some(window),
        }
        .clamped()
    }

    /// Caps the sliding window at [`MAX_SLIDING_EXPIRATION`].
    pub fn clamped(self) -> Self {
        Self {
            absolute: self.absolute,
            sliding: self.sliding.map(|s| s.min(MAX_SLIDING_EXPIRATION)),
        }
    }

    // == Is Expired ==
    /// Checks expiry against the time of the last access.
    ///
    /// Boundary condition: reaching the limit exactly counts as expired.
    pub fn is_expired(&self, last_access: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if let Some(at) = self.absolute {
            if now >= at {
                return true;
            }
        }
        match self.sliding {
            Some(window) => elapsed_between(last_access, now) >= window,
            None => false,
        }
    }

    /// The earliest instant this policy expires at, assuming no further access
    /// after `last_access`.
    pub fn deadline(&self, last_access: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let sliding = self
            .sliding
            .and_then(|window| chrono::Duration::from_std(window).ok())
            .map(|window| last_access + window);
        match (self.absolute, sliding) {
            (Some(a), Some(s)) => Some(a.min(s)),
            (a, s) => a.or(s),
        }
    }
}

/// Non-negative wall-clock time between two instants.
pub(crate) fn elapsed_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or_default()
}
