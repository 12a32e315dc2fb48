//! Time effect traits
//!
//! Wall-clock reads happen inside synchronous critical sections of the gossip map
//! (tombstone creation time, advertisement time), so the physical clock is a plain
//! synchronous trait.

use crate::time::Timestamp;

/// Physical wall clock
pub trait PhysicalTimeEffects: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn physical_time_ms(&self) -> u64;
}

/// Source of write timestamps for replicated maps
///
/// Called once per local write with the key and the value being written (`None` for
/// removals). Implementations must return timestamps that are newer than any previous
/// write the caller expects to supersede.
pub trait TimestampProvider<K, V>: Send + Sync {
    /// Timestamp for a write of `value` to `key`
    fn timestamp(&self, key: &K, value: Option<&V>) -> Timestamp;
}

impl<K, V, F> TimestampProvider<K, V> for F
where
    F: Fn(&K, Option<&V>) -> Timestamp + Send + Sync,
{
    fn timestamp(&self, key: &K, value: Option<&V>) -> Timestamp {
        self(key, value)
    }
}
