//! Partition replica effect traits
//!
//! A partition is an independently replicated, linearizable store. Each partition hosts
//! named primitives: consistent maps that take part in transactions, atomic counters
//! and leader electors. The consensus machinery behind a partition is outside this workspace;
//! `strand-effects` ships an in-memory reference partition.
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementation**: `strand-effects` (in-memory partition)
//! - **Usage**: the partition router and the transaction coordinator

use crate::election::Leadership;
use crate::errors::Result;
use crate::identifiers::{NodeId, PartitionId, TransactionId};
use crate::transaction::{MapUpdate, TransactionLog};
use crate::values::{StoreKey, StoreValue, Version, Versioned};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Transaction completion operations of a replica, independent of its key/value types
///
/// Recovery only knows a participant by name and partition, so commit and rollback must
/// be callable without the map's type parameters.
#[async_trait]
pub trait TransactionalReplica: Send + Sync {
    /// Apply the prepared log of `transaction_id` and release its keys
    ///
    /// Committing an unknown transaction is a no-op so that recovery can retry.
    async fn commit(&self, transaction_id: TransactionId) -> Result<()>;

    /// Discard the log of `transaction_id` and release its keys
    ///
    /// Rolling back an unknown transaction is a no-op.
    async fn rollback(&self, transaction_id: TransactionId) -> Result<()>;
}

/// Linearizable map hosted by one partition
#[async_trait]
pub trait PartitionReplica<K: StoreKey, V: StoreValue>: TransactionalReplica {
    /// Name of the map
    fn name(&self) -> &str;

    /// Number of live entries
    async fn size(&self) -> Result<usize>;

    /// Whether the map has no live entries
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.size().await? == 0)
    }

    /// Whether `key` has a live entry
    async fn contains_key(&self, key: &K) -> Result<bool>;

    /// Whether any live entry equals `value`
    async fn contains_value(&self, value: &V) -> Result<bool>;

    /// Current value of `key`
    async fn get(&self, key: &K) -> Result<Option<Versioned<V>>>;

    /// Write `value`, returning the previous value
    async fn put(&self, key: K, value: V) -> Result<Option<Versioned<V>>>;

    /// Write `value`, returning the new versioned value
    async fn put_and_get(&self, key: K, value: V) -> Result<Versioned<V>>;

    /// Write `value` only if `key` is absent; returns the existing value otherwise
    async fn put_if_absent(&self, key: K, value: V) -> Result<Option<Versioned<V>>>;

    /// Remove `key`, returning the previous value
    async fn remove(&self, key: &K) -> Result<Option<Versioned<V>>>;

    /// Remove `key` only if its value equals `value`
    async fn remove_value(&self, key: &K, value: &V) -> Result<bool>;

    /// Remove `key` only if it is at `version`
    async fn remove_version(&self, key: &K, version: u64) -> Result<bool>;

    /// Replace the value of a present key, returning the previous value
    async fn replace(&self, key: K, value: V) -> Result<Option<Versioned<V>>>;

    /// Replace the value only if it currently equals `old_value`
    async fn replace_value(&self, key: K, old_value: &V, new_value: V) -> Result<bool>;

    /// Replace the value only if the key is at `version`
    async fn replace_version(&self, key: K, version: u64, new_value: V) -> Result<bool>;

    /// Live keys
    async fn key_set(&self) -> Result<HashSet<K>>;

    /// Live values
    async fn values(&self) -> Result<Vec<Versioned<V>>>;

    /// Live entries
    async fn entry_set(&self) -> Result<Vec<(K, Versioned<V>)>>;

    /// Remove every entry
    async fn clear(&self) -> Result<()>;

    /// Open a transaction scope and return its lock version
    async fn begin(&self, transaction_id: TransactionId) -> Result<Version>;

    /// Validate and lock the keys of `log`
    async fn prepare(&self, log: TransactionLog<MapUpdate<K, V>>) -> Result<bool>;

    /// Validate and apply `log` in one step
    async fn prepare_and_commit(&self, log: TransactionLog<MapUpdate<K, V>>) -> Result<bool>;
}

/// Linearizable counter hosted by one partition
#[async_trait]
pub trait AtomicCounterEffects: Send + Sync {
    /// Current value
    async fn get(&self) -> Result<i64>;

    /// Overwrite the value
    async fn set(&self, value: i64) -> Result<()>;

    /// Add `delta` and return the new value
    async fn add_and_get(&self, delta: i64) -> Result<i64>;

    /// Add `delta` and return the previous value
    async fn get_and_add(&self, delta: i64) -> Result<i64>;

    /// Set to `update` only if the value equals `expect`
    async fn compare_and_set(&self, expect: i64, update: i64) -> Result<bool>;

    /// Increment and return the new value
    async fn increment_and_get(&self) -> Result<i64> {
        self.add_and_get(1).await
    }

    /// Increment and return the previous value
    async fn get_and_increment(&self) -> Result<i64> {
        self.get_and_add(1).await
    }
}

/// Linearizable leader election over named topics, hosted by one partition
///
/// The first candidate to run for a vacant topic becomes its leader. Every change of
/// leader starts a new term.
#[async_trait]
pub trait LeaderElectorEffects: Send + Sync {
    /// Register `node` as a candidate for `topic` and return the resulting leadership
    async fn run(&self, topic: &str, node: NodeId) -> Result<Leadership>;

    /// Remove `node` from the candidates of `topic`; its successor takes over if it led
    async fn withdraw(&self, topic: &str, node: &NodeId) -> Result<()>;

    /// Hand the leadership of `topic` to candidate `node`; returns whether it now leads
    async fn anoint(&self, topic: &str, node: &NodeId) -> Result<bool>;

    /// Move candidate `node` to the head of the succession; false if it is not a candidate
    async fn promote(&self, topic: &str, node: &NodeId) -> Result<bool>;

    /// Withdraw `node` from every topic
    async fn evict(&self, node: &NodeId) -> Result<()>;

    /// Leadership of `topic`; vacant when nobody runs for it
    async fn leadership(&self, topic: &str) -> Result<Leadership>;

    /// Every topic with at least one candidate
    async fn leaderships(&self) -> Result<BTreeMap<String, Leadership>>;
}

/// A partition able to host named primitives
///
/// Repeated requests for the same name return handles to the same underlying state.
pub trait PrimitivePartition: Send + Sync + 'static {
    /// Partition identity
    fn id(&self) -> PartitionId;

    /// Consistent map `name` hosted by this partition
    fn consistent_map<K: StoreKey, V: StoreValue>(
        &self,
        name: &str,
    ) -> Result<Arc<dyn PartitionReplica<K, V>>>;

    /// Atomic counter `name` hosted by this partition
    fn atomic_counter(&self, name: &str) -> Result<Arc<dyn AtomicCounterEffects>>;

    /// Leader elector `name` hosted by this partition
    fn leader_elector(&self, name: &str) -> Result<Arc<dyn LeaderElectorEffects>>;

    /// Type-erased transaction handle for an existing map `name`
    fn transactional(&self, name: &str) -> Option<Arc<dyn TransactionalReplica>>;
}
