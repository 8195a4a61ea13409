//! Millisecond timestamps used for liveness tracking and scan history.
//!
//! Heartbeats arrive every few tens of milliseconds, so second resolution
//! is too coarse for timeout checks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A Unix timestamp in milliseconds since epoch (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The epoch (time zero).
    pub const EPOCH: Self = Self(0);

    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Current system time. A clock set before the epoch reads as [`Timestamp::EPOCH`].
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(millis as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Time elapsed between this timestamp and `now` (zero if `now` is earlier).
    pub fn elapsed_since(&self, now: Timestamp) -> Duration {
        Duration::from_millis(now.0.saturating_sub(self.0))
    }

    /// Whether strictly more than `limit` has passed since this timestamp.
    pub fn is_older_than(&self, limit: Duration, now: Timestamp) -> bool {
        self.elapsed_since(now) > limit
    }

    pub fn saturating_add(&self, d: Duration) -> Self {
        Self(self.0.saturating_add(d.as_millis() as u64))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_saturates_for_future_timestamps() {
        let later = Timestamp::from_millis(2_000);
        let earlier = Timestamp::from_millis(1_000);
        assert_eq!(later.elapsed_since(earlier), Duration::ZERO);
        assert_eq!(earlier.elapsed_since(later), Duration::from_millis(1_000));
    }

    #[test]
    fn older_than_is_strict() {
        let t = Timestamp::from_millis(1_000);
        let limit = Duration::from_millis(500);
        assert!(!t.is_older_than(limit, Timestamp::from_millis(1_500)));
        assert!(t.is_older_than(limit, Timestamp::from_millis(1_501)));
    }

    #[test]
    fn now_is_after_epoch() {
        assert!(Timestamp::now() > Timestamp::EPOCH);
    }
}
