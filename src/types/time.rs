//! Timestamp type for message receive times

use serde::{Deserialize, Serialize};

/// Nanosecond-precision timestamp attached to every message event.
///
/// Times are opaque to the pipeline: they are only compared to detect
/// backward jumps (discontinuities) and to track first/last-seen per topic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Time(u64);

impl Time {
    /// The zero timestamp, used before any message has been observed.
    pub const ZERO: Time = Time(0);

    /// Create a time from a raw nanosecond count.
    pub const fn from_nanos(nanos: u64) -> Self {
        Time(nanos)
    }

    /// Create a time from milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Time(millis * 1_000_000)
    }

    /// Create a time from whole seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Time(secs * 1_000_000_000)
    }

    /// Raw nanosecond count.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}s", self.0 / 1_000_000_000, self.0 % 1_000_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_nanos() {
        assert!(Time::from_millis(1) < Time::from_millis(2));
        assert!(Time::from_secs(1) > Time::from_millis(999));
        assert_eq!(Time::from_secs(1), Time::from_millis(1000));
    }

    #[test]
    fn display_splits_seconds() {
        assert_eq!(Time::from_nanos(1_500_000_000).to_string(), "1.500000000s");
        assert_eq!(Time::ZERO.to_string(), "0.000000000s");
    }
}
