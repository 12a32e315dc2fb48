//! Timestamps used to order concurrent writes
//!
//! A [`Timestamp`] is totally ordered. A single map should use one provider family
//! consistently: every logical timestamp sorts before every wall-clock timestamp.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Totally ordered write timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timestamp {
    /// Monotonic counter value
    Logical(u64),
    /// Physical time plus a sequence number for writes within the same millisecond
    WallClock {
        /// Milliseconds since the Unix epoch
        unix_ms: u64,
        /// Tie breaker within one millisecond
        sequence: u32,
    },
}

impl Timestamp {
    /// Create a logical timestamp
    pub fn logical(value: u64) -> Self {
        Self::Logical(value)
    }

    /// Create a wall-clock timestamp
    pub fn wall_clock(unix_ms: u64, sequence: u32) -> Self {
        Self::WallClock { unix_ms, sequence }
    }

    /// Strictly newer than `other`
    pub fn is_newer_than(&self, other: &Timestamp) -> bool {
        self > other
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Logical(value) => write!(f, "L{value}"),
            Self::WallClock { unix_ms, sequence } => write!(f, "W{unix_ms}.{sequence}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_ordering() {
        assert!(Timestamp::logical(2).is_newer_than(&Timestamp::logical(1)));
        assert!(!Timestamp::logical(1).is_newer_than(&Timestamp::logical(1)));
    }

    #[test]
    fn test_wall_clock_sequence_breaks_ties() {
        let first = Timestamp::wall_clock(1_000, 0);
        let second = Timestamp::wall_clock(1_000, 1);
        let later = Timestamp::wall_clock(1_001, 0);
        assert!(second.is_newer_than(&first));
        assert!(later.is_newer_than(&second));
    }
}
