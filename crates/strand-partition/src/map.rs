//! Consistent map spread over several partitions

use crate::hasher::Hasher;
use futures::future::try_join_all;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use strand_core::effects::PartitionReplica;
use strand_core::{PartitionId, Result, StoreKey, StoreValue, StrandError, Versioned};
use tracing::{debug, trace};

/// Attempts made by [`PartitionedConsistentMap::compute_if`] before giving up
const COMPUTE_ATTEMPTS: usize = 8;

/// Routes single-key operations to the partition owning the key and fans whole-map
/// operations out to every partition
///
/// Whole-map results are assembled from independent per-partition reads and are not
/// atomic snapshots.
pub struct PartitionedConsistentMap<K, V> {
    name: String,
    hasher: Hasher,
    replicas: BTreeMap<PartitionId, Arc<dyn PartitionReplica<K, V>>>,
}

impl<K: StoreKey, V: StoreValue> PartitionedConsistentMap<K, V> {
    /// Router over one replica of map `name` per partition
    pub fn new(
        name: impl Into<String>,
        replicas: BTreeMap<PartitionId, Arc<dyn PartitionReplica<K, V>>>,
    ) -> Result<Self> {
        let hasher = Hasher::new(replicas.keys().copied())?;
        Ok(Self {
            name: name.into(),
            hasher,
            replicas,
        })
    }

    /// Map name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placement function
    pub fn hasher(&self) -> &Hasher {
        &self.hasher
    }

    /// Partitions in placement order
    pub fn partitions(&self) -> &[PartitionId] {
        self.hasher.partitions()
    }

    /// Per-partition replicas
    pub fn replicas(&self) -> &BTreeMap<PartitionId, Arc<dyn PartitionReplica<K, V>>> {
        &self.replicas
    }

    /// Partition owning `key`
    pub fn partition_for(&self, key: &K) -> Result<PartitionId> {
        self.hasher.partition_for(key)
    }

    /// Replica owning `key`
    pub fn replica_for(&self, key: &K) -> Result<&Arc<dyn PartitionReplica<K, V>>> {
        let partition = self.partition_for(key)?;
        trace!(map = %self.name, ?key, %partition, "Routing key");
        self.replicas.get(&partition).ok_or_else(|| {
            StrandError::internal(format!("no replica of '{}' on {partition}", self.name))
        })
    }

    /// Live entry count summed over every partition
    pub async fn size(&self) -> Result<usize> {
        let sizes = try_join_all(self.replicas.values().map(|replica| replica.size())).await?;
        Ok(sizes.into_iter().sum())
    }

    /// Whether every partition is empty
    pub async fn is_empty(&self) -> Result<bool> {
        let empty = try_join_all(self.replicas.values().map(|replica| replica.is_empty())).await?;
        Ok(empty.into_iter().all(|empty| empty))
    }

    /// Whether the owning partition holds `key`
    pub async fn contains_key(&self, key: &K) -> Result<bool> {
        self.replica_for(key)?.contains_key(key).await
    }

    /// Whether any partition holds `value`
    pub async fn contains_value(&self, value: &V) -> Result<bool> {
        let found =
            try_join_all(self.replicas.values().map(|replica| replica.contains_value(value)))
                .await?;
        Ok(found.into_iter().any(|found| found))
    }

    /// Current value of `key`
    pub async fn get(&self, key: &K) -> Result<Option<Versioned<V>>> {
        self.replica_for(key)?.get(key).await
    }

    /// Write `value`, returning the previous one
    pub async fn put(&self, key: K, value: V) -> Result<Option<Versioned<V>>> {
        self.replica_for(&key)?.put(key, value).await
    }

    /// Write `value`, returning the new versioned value
    pub async fn put_and_get(&self, key: K, value: V) -> Result<Versioned<V>> {
        self.replica_for(&key)?.put_and_get(key, value).await
    }

    /// Write `value` unless `key` is present; returns the existing value if any
    pub async fn put_if_absent(&self, key: K, value: V) -> Result<Option<Versioned<V>>> {
        self.replica_for(&key)?.put_if_absent(key, value).await
    }

    /// Remove `key`, returning the removed value
    pub async fn remove(&self, key: &K) -> Result<Option<Versioned<V>>> {
        self.replica_for(key)?.remove(key).await
    }

    /// Remove `key` only while it holds `value`
    pub async fn remove_value(&self, key: &K, value: &V) -> Result<bool> {
        self.replica_for(key)?.remove_value(key, value).await
    }

    /// Remove `key` only while it is at `version`
    pub async fn remove_version(&self, key: &K, version: u64) -> Result<bool> {
        self.replica_for(key)?.remove_version(key, version).await
    }

    /// Replace the value of a present `key`
    pub async fn replace(&self, key: K, value: V) -> Result<Option<Versioned<V>>> {
        self.replica_for(&key)?.replace(key, value).await
    }

    /// Replace `old_value` with `new_value`
    pub async fn replace_value(&self, key: K, old_value: &V, new_value: V) -> Result<bool> {
        self.replica_for(&key)?
            .replace_value(key, old_value, new_value)
            .await
    }

    /// Replace the value of `key` only while it is at `version`
    pub async fn replace_version(&self, key: K, version: u64, new_value: V) -> Result<bool> {
        self.replica_for(&key)?
            .replace_version(key, version, new_value)
            .await
    }

    /// Recompute the value of `key` when `condition` holds for the current value
    ///
    /// Runs as an optimistic compare-and-set against the owning replica: the new value
    /// is written only if the key is still at the version that was read. Returning
    /// `None` from `remap` removes the key. Returns the value held afterwards.
    pub async fn compute_if<C, F>(&self, key: K, condition: C, remap: F) -> Result<Option<Versioned<V>>>
    where
        C: Fn(Option<&V>) -> bool,
        F: Fn(&K, Option<&V>) -> Option<V>,
    {
        let replica = self.replica_for(&key)?;
        for attempt in 1..=COMPUTE_ATTEMPTS {
            let current = replica.get(&key).await?;
            let current_value = current.as_ref().map(Versioned::value);
            if !condition(current_value) {
                return Ok(current);
            }

            let applied = match (remap(&key, current_value), &current) {
                (Some(value), None) => replica.put_if_absent(key.clone(), value).await?.is_none(),
                (Some(value), Some(current)) => {
                    replica
                        .replace_version(key.clone(), current.version(), value)
                        .await?
                }
                (None, Some(current)) => replica.remove_version(&key, current.version()).await?,
                (None, None) => return Ok(None),
            };
            if applied {
                return replica.get(&key).await;
            }
            debug!(map = %self.name, ?key, attempt, "Concurrent update during compute; retrying");
        }
        Err(StrandError::concurrent_modification(format!(
            "compute on '{}' kept conflicting after {COMPUTE_ATTEMPTS} attempts",
            self.name
        )))
    }

    /// Union of every partition's keys
    pub async fn key_set(&self) -> Result<HashSet<K>> {
        let sets = try_join_all(self.replicas.values().map(|replica| replica.key_set())).await?;
        Ok(sets.into_iter().flatten().collect())
    }

    /// Every partition's values
    pub async fn values(&self) -> Result<Vec<Versioned<V>>> {
        let values = try_join_all(self.replicas.values().map(|replica| replica.values())).await?;
        Ok(values.into_iter().flatten().collect())
    }

    /// Every partition's entries
    pub async fn entry_set(&self) -> Result<Vec<(K, Versioned<V>)>> {
        let entries =
            try_join_all(self.replicas.values().map(|replica| replica.entry_set())).await?;
        Ok(entries.into_iter().flatten().collect())
    }

    /// Clear every partition
    pub async fn clear(&self) -> Result<()> {
        try_join_all(self.replicas.values().map(|replica| replica.clear())).await?;
        Ok(())
    }
}

impl<K, V> std::fmt::Debug for PartitionedConsistentMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionedConsistentMap")
            .field("name", &self.name)
            .field("partitions", &self.hasher)
            .finish_non_exhaustive()
    }
}
