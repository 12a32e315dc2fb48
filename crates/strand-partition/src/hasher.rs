//! Deterministic key and name placement

use serde::Serialize;
use strand_core::{PartitionId, Result, StrandError};

/// Maps keys and primitive names onto a fixed, ordered set of partitions
///
/// A key lands on `partitions[h mod N]`, where `h` is the first eight bytes
/// (little-endian) of the BLAKE3 hash of its bincode encoding and `partitions` is
/// sorted by id. The placement only depends on the key and the partition set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hasher {
    partitions: Vec<PartitionId>,
}

impl Hasher {
    /// Hasher over `partitions`; duplicates are ignored
    pub fn new(partitions: impl IntoIterator<Item = PartitionId>) -> Result<Self> {
        let mut partitions: Vec<PartitionId> = partitions.into_iter().collect();
        partitions.sort();
        partitions.dedup();
        if partitions.is_empty() {
            return Err(StrandError::invalid("at least one partition is required"));
        }
        Ok(Self { partitions })
    }

    /// Partitions in placement order
    pub fn partitions(&self) -> &[PartitionId] {
        &self.partitions
    }

    /// Partition owning `key`
    pub fn partition_for<K: Serialize + ?Sized>(&self, key: &K) -> Result<PartitionId> {
        let bytes = bincode::serialize(key)?;
        Ok(self.place(&bytes))
    }

    /// Partition a named primitive is pinned to
    pub fn partition_for_name(&self, name: &str) -> PartitionId {
        self.place(name.as_bytes())
    }

    fn place(&self, bytes: &[u8]) -> PartitionId {
        let len = self.partitions.len() as u64;
        self.partitions[(hash_bytes(bytes) % len) as usize]
    }
}

/// First eight bytes of the BLAKE3 hash of `bytes`, little-endian
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let digest = blake3::hash(bytes);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hasher(n: u32) -> Hasher {
        Hasher::new((1..=n).map(PartitionId)).unwrap()
    }

    #[test]
    fn test_empty_partition_set_is_rejected() {
        assert!(Hasher::new(Vec::new()).is_err());
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let forward = Hasher::new([PartitionId(1), PartitionId(2), PartitionId(3)]).unwrap();
        let shuffled =
            Hasher::new([PartitionId(3), PartitionId(1), PartitionId(2), PartitionId(1)]).unwrap();
        assert_eq!(forward, shuffled);
    }

    #[test]
    fn test_keys_spread_over_partitions() {
        let hasher = hasher(3);
        let mut seen = std::collections::BTreeSet::new();
        for key in 0..64u32 {
            seen.insert(hasher.partition_for(&format!("key-{key}")).unwrap());
        }
        assert_eq!(seen.len(), 3);
    }

    proptest! {
        #[test]
        fn prop_placement_is_stable(key in ".*", n in 1u32..8) {
            let first = hasher(n).partition_for(&key).unwrap();
            let second = hasher(n).partition_for(&key).unwrap();
            prop_assert_eq!(first, second);
            prop_assert!(first.id() >= 1 && first.id() <= n);
        }
    }
}
