//! Partition fixtures

use std::collections::BTreeMap;
use std::sync::Arc;
use strand_core::effects::PrimitivePartition;
use strand_core::PartitionId;
use strand_effects::MemoryPartition;
use strand_partition::{FederatedPrimitiveCreator, Hasher};

/// Partitions `1..=count`
pub fn memory_partitions(count: u32) -> Vec<Arc<MemoryPartition>> {
    (1..=count)
        .map(|id| Arc::new(MemoryPartition::new(PartitionId(id))))
        .collect()
}

/// Creator over [`memory_partitions`]
pub fn memory_creator(count: u32) -> Arc<FederatedPrimitiveCreator<MemoryPartition>> {
    Arc::new(FederatedPrimitiveCreator::new(memory_partitions(count)).expect("partitions are unique"))
}

/// One `key-N` string per partition, keyed by the partition that owns it
pub fn keys_on_distinct_partitions(hasher: &Hasher) -> BTreeMap<PartitionId, String> {
    let mut keys = BTreeMap::new();
    for i in 0.. {
        if keys.len() == hasher.partitions().len() {
            break;
        }
        let key = format!("key-{i}");
        let partition = hasher.partition_for(&key).expect("string keys encode");
        keys.entry(partition).or_insert(key);
    }
    keys
}

/// Partition ids of `partitions` in order
pub fn partition_ids<P: PrimitivePartition>(partitions: &[Arc<P>]) -> Vec<PartitionId> {
    partitions.iter().map(|p| p.id()).collect()
}
