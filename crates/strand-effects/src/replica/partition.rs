//! In-memory partition hosting named primitives

use super::{MemoryAtomicCounter, MemoryConsistentMap, MemoryLeaderElector};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use strand_core::effects::{
    AtomicCounterEffects, LeaderElectorEffects, PartitionReplica, PrimitivePartition,
    TransactionalReplica,
};
use strand_core::{PartitionId, Result, StoreKey, StoreValue, StrandError};
use tracing::debug;

struct HostedMap {
    typed: Arc<dyn Any + Send + Sync>,
    transactional: Arc<dyn TransactionalReplica>,
}

/// Partition whose primitives live in process memory
pub struct MemoryPartition {
    id: PartitionId,
    maps: Mutex<HashMap<String, HostedMap>>,
    counters: Mutex<HashMap<String, Arc<MemoryAtomicCounter>>>,
    electors: Mutex<HashMap<String, Arc<MemoryLeaderElector>>>,
}

impl MemoryPartition {
    /// Create an empty partition
    pub fn new(id: PartitionId) -> Self {
        Self {
            id,
            maps: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            electors: Mutex::new(HashMap::new()),
        }
    }

    /// Concrete map `name`, created on first use
    pub fn memory_map<K: StoreKey, V: StoreValue>(
        &self,
        name: &str,
    ) -> Result<Arc<MemoryConsistentMap<K, V>>> {
        let mut maps = self.maps.lock();
        if let Some(hosted) = maps.get(name) {
            return hosted
                .typed
                .clone()
                .downcast::<MemoryConsistentMap<K, V>>()
                .map_err(|_| {
                    StrandError::invalid(format!(
                        "map '{name}' on {} exists with different key/value types",
                        self.id
                    ))
                });
        }

        debug!(partition = %self.id, map = name, "Creating map");
        let map = Arc::new(MemoryConsistentMap::<K, V>::new(name));
        maps.insert(
            name.to_string(),
            HostedMap {
                typed: map.clone(),
                transactional: map.clone(),
            },
        );
        Ok(map)
    }

    /// Names of the maps hosted so far
    pub fn map_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.maps.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl PrimitivePartition for MemoryPartition {
    fn id(&self) -> PartitionId {
        self.id
    }

    fn consistent_map<K: StoreKey, V: StoreValue>(
        &self,
        name: &str,
    ) -> Result<Arc<dyn PartitionReplica<K, V>>> {
        let map: Arc<dyn PartitionReplica<K, V>> = self.memory_map::<K, V>(name)?;
        Ok(map)
    }

    fn atomic_counter(&self, name: &str) -> Result<Arc<dyn AtomicCounterEffects>> {
        let counter = self
            .counters
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryAtomicCounter::new()))
            .clone();
        Ok(counter)
    }

    fn leader_elector(&self, name: &str) -> Result<Arc<dyn LeaderElectorEffects>> {
        let elector = self
            .electors
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryLeaderElector::new()))
            .clone();
        Ok(elector)
    }

    fn transactional(&self, name: &str) -> Option<Arc<dyn TransactionalReplica>> {
        self.maps
            .lock()
            .get(name)
            .map(|hosted| hosted.transactional.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_name_shares_state() {
        let partition = MemoryPartition::new(PartitionId(1));
        let first = partition.consistent_map::<String, u32>("m").unwrap();
        let second = partition.consistent_map::<String, u32>("m").unwrap();

        first.put("k".into(), 7).await.unwrap();
        assert_eq!(second.get(&"k".into()).await.unwrap().unwrap().into_value(), 7);
        assert!(partition.transactional("m").is_some());
        assert!(partition.transactional("other").is_none());
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let partition = MemoryPartition::new(PartitionId(1));
        partition.consistent_map::<String, u32>("m").unwrap();
        let err = partition.consistent_map::<String, String>("m").err().unwrap();
        assert!(matches!(err, StrandError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_electors_are_named() {
        let partition = MemoryPartition::new(PartitionId(3));
        let node = strand_core::NodeId::new("a");
        partition.leader_elector("e").unwrap().run("t", node.clone()).await.unwrap();

        let same = partition.leader_elector("e").unwrap().leadership("t").await.unwrap();
        assert!(same.is_leader(&node));
        let other = partition.leader_elector("f").unwrap().leadership("t").await.unwrap();
        assert!(other.leader.is_none());
    }

    #[tokio::test]
    async fn test_counters_are_named() {
        let partition = MemoryPartition::new(PartitionId(2));
        partition.atomic_counter("c").unwrap().add_and_get(3).await.unwrap();
        assert_eq!(partition.atomic_counter("c").unwrap().get().await.unwrap(), 3);
        assert_eq!(partition.atomic_counter("d").unwrap().get().await.unwrap(), 0);
    }
}
