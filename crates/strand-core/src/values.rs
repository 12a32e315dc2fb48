//! Replicated value wrappers
//!
//! [`MapValue`] is the unit of last-writer-wins replication in the gossip map, and
//! [`Digest`] its value-free summary exchanged during anti-entropy. [`Versioned`] is what
//! a strongly consistent partition replica hands back for reads and writes.

use crate::time::Timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;

/// Bounds required of keys stored in Strand primitives
pub trait StoreKey:
    Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> StoreKey for T where
    T: Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Bounds required of values stored in Strand primitives
pub trait StoreValue:
    Clone + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> StoreValue for T where
    T: Clone + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// A timestamped value or tombstone
///
/// A tombstone is a `MapValue` without a value. It can only be built through
/// [`MapValue::tombstone`], so a tombstone never carries a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapValue<V> {
    value: Option<V>,
    timestamp: Timestamp,
    creation_time: u64,
}

impl<V> MapValue<V> {
    /// Create a live value
    pub fn new(value: V, timestamp: Timestamp, creation_time: u64) -> Self {
        Self {
            value: Some(value),
            timestamp,
            creation_time,
        }
    }

    /// Create a tombstone recording a removal at `timestamp`
    pub fn tombstone(timestamp: Timestamp, creation_time: u64) -> Self {
        Self {
            value: None,
            timestamp,
            creation_time,
        }
    }

    /// Whether this value records a removal
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Whether this value carries a payload
    pub fn is_alive(&self) -> bool {
        self.value.is_some()
    }

    /// Borrow the payload, if live
    pub fn get(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// Take the payload, if live
    pub fn into_value(self) -> Option<V> {
        self.value
    }

    /// Write timestamp
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Local wall-clock milliseconds at which the value was created
    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    /// Same value and timestamp, re-stamped with a local creation time
    ///
    /// Applied to values received from peers so that the purge watermark, which is
    /// measured on the local clock, only covers entries present at advertisement time.
    pub fn with_creation_time(mut self, creation_time: u64) -> Self {
        self.creation_time = creation_time;
        self
    }

    /// Value-free summary
    pub fn digest(&self) -> Digest {
        Digest {
            timestamp: self.timestamp,
            tombstone: self.is_tombstone(),
        }
    }

    /// Last-writer-wins comparison
    ///
    /// At equal timestamps a tombstone beats a live value; two live values (or two
    /// tombstones) with equal timestamps are not newer than each other.
    pub fn is_newer_than(&self, other: &MapValue<V>) -> bool {
        lww_newer(
            self.timestamp,
            self.is_tombstone(),
            other.timestamp,
            other.is_tombstone(),
        )
    }

    /// Compare against a remote digest with the same rule as [`Self::is_newer_than`]
    pub fn is_newer_than_digest(&self, other: &Digest) -> bool {
        self.digest().is_newer_than(other)
    }
}

/// Summary of a [`MapValue`] used during anti-entropy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    /// Write timestamp of the summarised value
    pub timestamp: Timestamp,
    /// Whether the summarised value is a tombstone
    pub tombstone: bool,
}

impl Digest {
    /// Last-writer-wins comparison, identical to [`MapValue::is_newer_than`]
    pub fn is_newer_than(&self, other: &Digest) -> bool {
        lww_newer(self.timestamp, self.tombstone, other.timestamp, other.tombstone)
    }
}

fn lww_newer(ts: Timestamp, tombstone: bool, other_ts: Timestamp, other_tombstone: bool) -> bool {
    match ts.cmp(&other_ts) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Equal => tombstone && !other_tombstone,
        std::cmp::Ordering::Less => false,
    }
}

/// A value read from or written to a partition replica together with its version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<V> {
    value: V,
    version: u64,
}

impl<V> Versioned<V> {
    /// Wrap a value with its version
    pub fn new(value: V, version: u64) -> Self {
        Self { value, version }
    }

    /// Borrow the value
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Replica version at which the value was written
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Take the value
    pub fn into_value(self) -> V {
        self.value
    }

    /// Transform the value, keeping the version
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Versioned<U> {
        Versioned {
            value: f(self.value),
            version: self.version,
        }
    }
}

/// Lock token handed out by a partition replica when a transaction begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version(pub u64);

impl Version {
    /// Numeric version
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tombstone_has_no_value() {
        let tombstone: MapValue<String> = MapValue::tombstone(Timestamp::logical(4), 10);
        assert!(tombstone.is_tombstone());
        assert!(tombstone.get().is_none());
        assert!(tombstone.digest().tombstone);
    }

    #[test]
    fn test_newer_timestamp_wins() {
        let old = MapValue::new("a", Timestamp::logical(1), 0);
        let new = MapValue::new("b", Timestamp::logical(2), 0);
        assert!(new.is_newer_than(&old));
        assert!(!old.is_newer_than(&new));
    }

    #[test]
    fn test_equal_timestamps_tombstone_wins() {
        let live = MapValue::new("a", Timestamp::logical(5), 0);
        let dead = MapValue::tombstone(Timestamp::logical(5), 0);
        assert!(dead.is_newer_than(&live));
        assert!(!live.is_newer_than(&dead));
        assert!(!live.is_newer_than(&live.clone()));
        assert!(dead.is_newer_than_digest(&live.digest()));
    }

    #[test]
    fn test_versioned_map_keeps_version() {
        let versioned = Versioned::new(2_u32, 7).map(|v| v * 10);
        assert_eq!(versioned.value(), &20);
        assert_eq!(versioned.version(), 7);
    }
}
