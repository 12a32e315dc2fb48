//! Primitive creation over a fixed set of partitions

use crate::cache::{PrimitiveCache, PrimitiveKind};
use crate::counter::DistributedAtomicCounter;
use crate::elector::DistributedLeaderElector;
use crate::hasher::Hasher;
use crate::map::PartitionedConsistentMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use strand_core::effects::{PartitionReplica, PrimitivePartition};
use strand_core::{PartitionId, Result, StoreKey, StoreValue, StrandError};
use tracing::{debug, info};

/// Creates partitioned primitives over an immutable routing table
///
/// Maps span every partition; counters and leader electors are pinned to the partition
/// their name hashes to. Instances are cached per name, so repeated lookups share one handle. A change
/// in partition membership is handled by building a new creator.
pub struct FederatedPrimitiveCreator<P> {
    partitions: BTreeMap<PartitionId, Arc<P>>,
    hasher: Hasher,
    cache: PrimitiveCache,
}

impl<P: PrimitivePartition> FederatedPrimitiveCreator<P> {
    /// Creator over `partitions`; ids must be unique and the set non-empty
    pub fn new(partitions: impl IntoIterator<Item = Arc<P>>) -> Result<Self> {
        let mut table = BTreeMap::new();
        for partition in partitions {
            let id = partition.id();
            if table.insert(id, partition).is_some() {
                return Err(StrandError::invalid(format!("duplicate partition {id}")));
            }
        }
        let hasher = Hasher::new(table.keys().copied())?;
        info!(partitions = table.len(), "Federated primitive creator ready");
        Ok(Self {
            partitions: table,
            hasher,
            cache: PrimitiveCache::new(),
        })
    }

    /// Partitioned map `name`
    pub fn consistent_map<K: StoreKey, V: StoreValue>(
        &self,
        name: &str,
    ) -> Result<Arc<PartitionedConsistentMap<K, V>>> {
        self.cache
            .get_or_try_insert(PrimitiveKind::ConsistentMap, name, || {
                debug!(map = name, "Creating partitioned map");
                let replicas = self
                    .partitions
                    .iter()
                    .map(|(id, partition)| {
                        let replica: Arc<dyn PartitionReplica<K, V>> =
                            partition.consistent_map::<K, V>(name)?;
                        Ok::<_, StrandError>((*id, replica))
                    })
                    .collect::<Result<BTreeMap<_, _>>>()?;
                PartitionedConsistentMap::new(name, replicas)
            })
    }

    /// Counter `name`, pinned to the partition its name hashes to
    pub fn atomic_counter(&self, name: &str) -> Result<Arc<DistributedAtomicCounter>> {
        self.cache
            .get_or_try_insert(PrimitiveKind::AtomicCounter, name, || {
                let partition = self.hasher.partition_for_name(name);
                debug!(counter = name, %partition, "Creating pinned counter");
                let inner = self.partition_or_err(partition)?.atomic_counter(name)?;
                Ok(DistributedAtomicCounter::new(name, partition, inner))
            })
    }

    /// Leader elector `name`, pinned to the partition its name hashes to
    pub fn leader_elector(&self, name: &str) -> Result<Arc<DistributedLeaderElector>> {
        self.cache
            .get_or_try_insert(PrimitiveKind::LeaderElector, name, || {
                let partition = self.hasher.partition_for_name(name);
                debug!(elector = name, %partition, "Creating pinned leader elector");
                let inner = self.partition_or_err(partition)?.leader_elector(name)?;
                Ok(DistributedLeaderElector::new(name, partition, inner))
            })
    }

    /// Partition `id`
    pub fn partition(&self, id: PartitionId) -> Option<&Arc<P>> {
        self.partitions.get(&id)
    }

    /// Every partition id in order
    pub fn partition_ids(&self) -> Vec<PartitionId> {
        self.partitions.keys().copied().collect()
    }

    /// Every partition in id order
    pub fn partitions(&self) -> impl Iterator<Item = &Arc<P>> {
        self.partitions.values()
    }

    /// Placement function
    pub fn hasher(&self) -> &Hasher {
        &self.hasher
    }

    fn partition_or_err(&self, id: PartitionId) -> Result<&Arc<P>> {
        self.partitions
            .get(&id)
            .ok_or_else(|| StrandError::not_found(format!("partition {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::effects::LeaderElectorEffects;
    use strand_effects::MemoryPartition;

    fn creator(n: u32) -> FederatedPrimitiveCreator<MemoryPartition> {
        FederatedPrimitiveCreator::new((1..=n).map(|id| Arc::new(MemoryPartition::new(PartitionId(id)))))
            .unwrap()
    }

    #[test]
    fn test_duplicate_partition_is_rejected() {
        let result = FederatedPrimitiveCreator::new([
            Arc::new(MemoryPartition::new(PartitionId(1))),
            Arc::new(MemoryPartition::new(PartitionId(1))),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_maps_are_cached_per_name() {
        let creator = creator(3);
        let first = creator.consistent_map::<String, u32>("m").unwrap();
        let second = creator.consistent_map::<String, u32>("m").unwrap();
        let other = creator.consistent_map::<String, u32>("n").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(first.partitions().len(), 3);
        assert!(creator.consistent_map::<String, String>("m").is_err());
    }

    #[tokio::test]
    async fn test_elector_is_pinned_and_cached() {
        let creator = creator(3);
        let elector = creator.leader_elector("masters").unwrap();
        assert!(Arc::ptr_eq(&elector, &creator.leader_elector("masters").unwrap()));
        assert_eq!(elector.partition(), creator.hasher().partition_for_name("masters"));

        let node = strand_core::NodeId::new("n1");
        elector.run("device-1", node.clone()).await.unwrap();
        assert_eq!(elector.leader("device-1").await.unwrap(), Some(node));

        let pinned = creator.partition(elector.partition()).unwrap();
        let direct = pinned.leader_elector("masters").unwrap();
        assert_eq!(direct.leadership("device-1").await.unwrap().candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_counter_is_pinned_to_hashed_partition() {
        let creator = creator(3);
        let counter = creator.atomic_counter("hits").unwrap();
        assert_eq!(counter.partition(), creator.hasher().partition_for_name("hits"));

        counter.increment_and_get().await.unwrap();
        counter.add_and_get(4).await.unwrap();

        let pinned = creator.partition(counter.partition()).unwrap();
        assert_eq!(pinned.atomic_counter("hits").unwrap().get().await.unwrap(), 5);
        for id in creator.partition_ids() {
            if id != counter.partition() {
                let other = creator.partition(id).unwrap();
                assert_eq!(other.atomic_counter("hits").unwrap().get().await.unwrap(), 0);
            }
        }
    }
}
