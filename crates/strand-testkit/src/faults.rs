//! Partitions with scriptable failures

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use strand_core::effects::{
    AtomicCounterEffects, LeaderElectorEffects, PartitionReplica, PrimitivePartition,
    TransactionalReplica,
};
use strand_core::{
    MapUpdate, PartitionId, Result, StoreKey, StoreValue, StrandError, TransactionId,
    TransactionLog, Version, Versioned,
};
use strand_effects::MemoryPartition;

/// Failures a [`FaultInjectingPartition`] applies to every replica it hosts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Every call fails with a network error
    pub unavailable: bool,
    /// Prepares answer "not prepared" without touching the replica
    pub fail_prepare: bool,
    /// Prepares stall this long before reaching the replica
    pub prepare_delay: Option<Duration>,
    /// Commits fail with a network error
    pub fail_commit: bool,
    /// Begins stall this long before reaching the replica
    pub begin_delay: Option<Duration>,
}

type SharedPlan = Arc<Mutex<FaultPlan>>;

/// [`MemoryPartition`] whose replicas consult a shared [`FaultPlan`]
pub struct FaultInjectingPartition {
    inner: MemoryPartition,
    plan: SharedPlan,
}

impl FaultInjectingPartition {
    /// Partition `id` with no faults planned
    pub fn new(id: PartitionId) -> Self {
        Self {
            inner: MemoryPartition::new(id),
            plan: Arc::new(Mutex::new(FaultPlan::default())),
        }
    }

    /// Replace the current plan
    pub fn set_plan(&self, plan: FaultPlan) {
        *self.plan.lock() = plan;
    }

    /// Stop injecting failures
    pub fn heal(&self) {
        self.set_plan(FaultPlan::default());
    }

    /// Underlying partition, bypassing the faults
    pub fn inner(&self) -> &MemoryPartition {
        &self.inner
    }
}

impl PrimitivePartition for FaultInjectingPartition {
    fn id(&self) -> PartitionId {
        self.inner.id()
    }

    fn consistent_map<K: StoreKey, V: StoreValue>(
        &self,
        name: &str,
    ) -> Result<Arc<dyn PartitionReplica<K, V>>> {
        let replica: Arc<dyn PartitionReplica<K, V>> = Arc::new(FaultInjectingReplica {
            inner: self.inner.consistent_map::<K, V>(name)?,
            plan: self.plan.clone(),
        });
        Ok(replica)
    }

    fn atomic_counter(&self, name: &str) -> Result<Arc<dyn AtomicCounterEffects>> {
        self.inner.atomic_counter(name)
    }

    fn leader_elector(&self, name: &str) -> Result<Arc<dyn LeaderElectorEffects>> {
        self.inner.leader_elector(name)
    }

    fn transactional(&self, name: &str) -> Option<Arc<dyn TransactionalReplica>> {
        let inner = self.inner.transactional(name)?;
        let replica: Arc<dyn TransactionalReplica> = Arc::new(FaultInjectingCompletion {
            inner,
            plan: self.plan.clone(),
        });
        Some(replica)
    }
}

fn check_available(plan: &SharedPlan) -> Result<()> {
    if plan.lock().unavailable {
        return Err(StrandError::network("partition unavailable"));
    }
    Ok(())
}

fn check_commit(plan: &SharedPlan) -> Result<()> {
    check_available(plan)?;
    if plan.lock().fail_commit {
        return Err(StrandError::network("commit rejected by fault plan"));
    }
    Ok(())
}

struct FaultInjectingCompletion {
    inner: Arc<dyn TransactionalReplica>,
    plan: SharedPlan,
}

#[async_trait]
impl TransactionalReplica for FaultInjectingCompletion {
    async fn commit(&self, transaction_id: TransactionId) -> Result<()> {
        check_commit(&self.plan)?;
        self.inner.commit(transaction_id).await
    }

    async fn rollback(&self, transaction_id: TransactionId) -> Result<()> {
        check_available(&self.plan)?;
        self.inner.rollback(transaction_id).await
    }
}

/// Replica wrapper applying the partition's [`FaultPlan`]
pub struct FaultInjectingReplica<K, V> {
    inner: Arc<dyn PartitionReplica<K, V>>,
    plan: SharedPlan,
}

#[async_trait]
impl<K: StoreKey, V: StoreValue> TransactionalReplica for FaultInjectingReplica<K, V> {
    async fn commit(&self, transaction_id: TransactionId) -> Result<()> {
        check_commit(&self.plan)?;
        self.inner.commit(transaction_id).await
    }

    async fn rollback(&self, transaction_id: TransactionId) -> Result<()> {
        check_available(&self.plan)?;
        self.inner.rollback(transaction_id).await
    }
}

#[async_trait]
impl<K: StoreKey, V: StoreValue> PartitionReplica<K, V> for FaultInjectingReplica<K, V> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn size(&self) -> Result<usize> {
        check_available(&self.plan)?;
        self.inner.size().await
    }

    async fn contains_key(&self, key: &K) -> Result<bool> {
        check_available(&self.plan)?;
        self.inner.contains_key(key).await
    }

    async fn contains_value(&self, value: &V) -> Result<bool> {
        check_available(&self.plan)?;
        self.inner.contains_value(value).await
    }

    async fn get(&self, key: &K) -> Result<Option<Versioned<V>>> {
        check_available(&self.plan)?;
        self.inner.get(key).await
    }

    async fn put(&self, key: K, value: V) -> Result<Option<Versioned<V>>> {
        check_available(&self.plan)?;
        self.inner.put(key, value).await
    }

    async fn put_and_get(&self, key: K, value: V) -> Result<Versioned<V>> {
        check_available(&self.plan)?;
        self.inner.put_and_get(key, value).await
    }

    async fn put_if_absent(&self, key: K, value: V) -> Result<Option<Versioned<V>>> {
        check_available(&self.plan)?;
        self.inner.put_if_absent(key, value).await
    }

    async fn remove(&self, key: &K) -> Result<Option<Versioned<V>>> {
        check_available(&self.plan)?;
        self.inner.remove(key).await
    }

    async fn remove_value(&self, key: &K, value: &V) -> Result<bool> {
        check_available(&self.plan)?;
        self.inner.remove_value(key, value).await
    }

    async fn remove_version(&self, key: &K, version: u64) -> Result<bool> {
        check_available(&self.plan)?;
        self.inner.remove_version(key, version).await
    }

    async fn replace(&self, key: K, value: V) -> Result<Option<Versioned<V>>> {
        check_available(&self.plan)?;
        self.inner.replace(key, value).await
    }

    async fn replace_value(&self, key: K, old_value: &V, new_value: V) -> Result<bool> {
        check_available(&self.plan)?;
        self.inner.replace_value(key, old_value, new_value).await
    }

    async fn replace_version(&self, key: K, version: u64, new_value: V) -> Result<bool> {
        check_available(&self.plan)?;
        self.inner.replace_version(key, version, new_value).await
    }

    async fn key_set(&self) -> Result<HashSet<K>> {
        check_available(&self.plan)?;
        self.inner.key_set().await
    }

    async fn values(&self) -> Result<Vec<Versioned<V>>> {
        check_available(&self.plan)?;
        self.inner.values().await
    }

    async fn entry_set(&self) -> Result<Vec<(K, Versioned<V>)>> {
        check_available(&self.plan)?;
        self.inner.entry_set().await
    }

    async fn clear(&self) -> Result<()> {
        check_available(&self.plan)?;
        self.inner.clear().await
    }

    async fn begin(&self, transaction_id: TransactionId) -> Result<Version> {
        check_available(&self.plan)?;
        let delay = self.plan.lock().begin_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.begin(transaction_id).await
    }

    async fn prepare(&self, log: TransactionLog<MapUpdate<K, V>>) -> Result<bool> {
        check_available(&self.plan)?;
        let (fail, delay) = {
            let plan = self.plan.lock();
            (plan.fail_prepare, plan.prepare_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Ok(false);
        }
        self.inner.prepare(log).await
    }

    async fn prepare_and_commit(&self, log: TransactionLog<MapUpdate<K, V>>) -> Result<bool> {
        check_available(&self.plan)?;
        let (fail, delay) = {
            let plan = self.plan.lock();
            (plan.fail_prepare, plan.prepare_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Ok(false);
        }
        self.inner.prepare_and_commit(log).await
    }
}
