//! Write timestamp providers
//!
//! [`LogicalClock`] hands out strictly increasing counter values; sharing one clock
//! between simulated nodes gives a global write order. [`WallClockTimestamps`] derives
//! timestamps from a physical clock and never goes backwards, even if the clock does.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strand_core::effects::{PhysicalTimeEffects, TimestampProvider};
use strand_core::Timestamp;

/// Shared monotonic counter
#[derive(Debug, Clone, Default)]
pub struct LogicalClock {
    counter: Arc<AtomicU64>,
}

impl LogicalClock {
    /// Create a clock whose first timestamp is `Logical(1)`
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp
    pub fn tick(&self) -> Timestamp {
        Timestamp::Logical(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Last timestamp handed out
    pub fn current(&self) -> Timestamp {
        Timestamp::Logical(self.counter.load(Ordering::SeqCst))
    }
}

impl<K, V> TimestampProvider<K, V> for LogicalClock {
    fn timestamp(&self, _key: &K, _value: Option<&V>) -> Timestamp {
        self.tick()
    }
}

/// Physical-time timestamps with a per-millisecond sequence
pub struct WallClockTimestamps {
    clock: Arc<dyn PhysicalTimeEffects>,
    last: Mutex<(u64, u32)>,
}

impl WallClockTimestamps {
    /// Create a provider reading `clock`
    pub fn new(clock: Arc<dyn PhysicalTimeEffects>) -> Self {
        Self {
            clock,
            last: Mutex::new((0, 0)),
        }
    }

    /// Next timestamp
    pub fn next(&self) -> Timestamp {
        let now = self.clock.physical_time_ms();
        let mut last = self.last.lock();
        let (unix_ms, sequence) = if now > last.0 {
            (now, 0)
        } else if last.1 == u32::MAX {
            (last.0 + 1, 0)
        } else {
            (last.0, last.1 + 1)
        };
        *last = (unix_ms, sequence);
        Timestamp::WallClock { unix_ms, sequence }
    }
}

impl<K, V> TimestampProvider<K, V> for WallClockTimestamps {
    fn timestamp(&self, _key: &K, _value: Option<&V>) -> Timestamp {
        self.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SimulatedClock;

    #[test]
    fn test_logical_clock_is_shared() {
        let clock = LogicalClock::new();
        let other = clock.clone();
        assert_eq!(clock.tick(), Timestamp::Logical(1));
        assert_eq!(other.tick(), Timestamp::Logical(2));
        assert_eq!(clock.current(), Timestamp::Logical(2));
    }

    #[test]
    fn test_wall_clock_is_monotonic() {
        let clock = SimulatedClock::new(1_000);
        let provider = WallClockTimestamps::new(Arc::new(clock.clone()));

        let first = provider.next();
        let second = provider.next();
        assert_eq!(second, Timestamp::wall_clock(1_000, 1));
        assert!(second.is_newer_than(&first));

        clock.set(500);
        let third = provider.next();
        assert!(third.is_newer_than(&second));

        clock.set(2_000);
        assert_eq!(provider.next(), Timestamp::wall_clock(2_000, 0));
    }
}
