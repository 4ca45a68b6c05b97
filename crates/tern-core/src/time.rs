//! Virtual time
//!
//! Routing state never reads a wall clock directly. Every operation that
//! depends on time takes a [`Timestamp`], which a [`Clock`](crate::Clock)
//! produces. Timestamps count microseconds since the clock's epoch so that
//! sub-millisecond egress jitter stays representable.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A point in virtual time, in microseconds since the clock epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The clock epoch
    pub const ZERO: Timestamp = Timestamp(0);

    /// Far future, used for "never expires"
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    #[inline]
    pub const fn from_micros(us: u64) -> Self {
        Timestamp(us)
    }

    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Timestamp(ms.saturating_mul(1_000))
    }

    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs.saturating_mul(1_000_000))
    }

    #[inline]
    pub const fn as_micros(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000
    }

    /// Add a duration, clamping at [`Timestamp::MAX`]
    #[inline]
    pub fn saturating_add(self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration_micros(duration)))
    }

    /// Time elapsed since `earlier`, or zero if `earlier` is in the future
    #[inline]
    pub const fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }

    /// Time remaining until `self` as seen from `now`, zero once reached
    #[inline]
    pub const fn remaining_from(self, now: Timestamp) -> Duration {
        self.saturating_duration_since(now)
    }

    /// Whether this deadline has been reached at `now`
    #[inline]
    pub const fn has_passed(self, now: Timestamp) -> bool {
        self.0 <= now.0
    }
}

#[inline]
fn duration_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    #[inline]
    fn add(self, rhs: Duration) -> Timestamp {
        self.saturating_add(rhs)
    }
}

impl AddAssign<Duration> for Timestamp {
    #[inline]
    fn add_assign(&mut self, rhs: Duration) {
        *self = self.saturating_add(rhs);
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Timestamp) -> Duration {
        self.saturating_duration_since(rhs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}s", self.0 / 1_000_000, self.0 % 1_000_000)
    }
}
