//! Transaction participants
//!
//! A participant is the slice of a transaction that touches one primitive on one
//! partition. [`TransactionalMapParticipant`] buffers the reads and writes a client
//! makes against one partition of a map and turns them into the update log the
//! replica validates on prepare.

use crate::state::TransactionState;
use crate::transaction::Transaction;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use strand_core::effects::PartitionReplica;
use strand_core::{
    MapUpdate, PartitionId, Result, StoreKey, StoreValue, StrandError, TransactionId, Version,
    Versioned,
};

/// Names the replica a participant runs against, so recovery can find it again
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantRef {
    /// Primitive name
    pub primitive: String,
    /// Partition hosting the primitive's replica
    pub partition: PartitionId,
}

impl fmt::Display for ParticipantRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.primitive, self.partition)
    }
}

/// Type-erased participant driven by the coordinator
#[async_trait]
pub trait TransactionParticipant: Send + Sync {
    /// Replica this participant runs against
    fn participant_ref(&self) -> ParticipantRef;

    /// Whether committing would change the replica
    fn has_pending_updates(&self) -> bool;

    /// Current lifecycle state
    fn state(&self) -> TransactionState;

    /// First phase of two-phase commit
    async fn prepare(&self) -> Result<bool>;

    /// Single-participant fast path
    async fn prepare_and_commit(&self) -> Result<bool>;

    /// Second phase, after every participant prepared
    async fn commit(&self) -> Result<()>;

    /// Abandon the transaction on the replica
    async fn rollback(&self) -> Result<()>;
}

#[derive(Debug)]
struct Buffers<K, V> {
    /// First read of each key; `None` when the key was absent
    read_cache: HashMap<K, Option<Versioned<V>>>,
    write_cache: HashMap<K, V>,
    delete_set: HashSet<K>,
}

/// Buffers one transaction's operations against one partition of a map
///
/// Reads are repeatable: the first read of a key is cached and every later read of that
/// key, including the implicit reads done by writes, sees the same version.
pub struct TransactionalMapParticipant<K, V> {
    primitive: String,
    partition: PartitionId,
    transaction: Transaction<K, V>,
    buffers: Mutex<Buffers<K, V>>,
}

impl<K: StoreKey, V: StoreValue> TransactionalMapParticipant<K, V> {
    /// Participant for map `primitive` on `partition`
    pub fn new(
        transaction_id: TransactionId,
        primitive: impl Into<String>,
        partition: PartitionId,
        replica: Arc<dyn PartitionReplica<K, V>>,
        timeout: Duration,
    ) -> Self {
        Self {
            primitive: primitive.into(),
            partition,
            transaction: Transaction::new(transaction_id, replica, timeout),
            buffers: Mutex::new(Buffers {
                read_cache: HashMap::new(),
                write_cache: HashMap::new(),
                delete_set: HashSet::new(),
            }),
        }
    }

    /// Acquire the replica's lock version
    pub async fn begin(&self) -> Result<Version> {
        self.transaction.begin().await
    }

    /// Underlying replica scope
    pub fn transaction(&self) -> &Transaction<K, V> {
        &self.transaction
    }

    /// Value of `key` as this transaction sees it
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        self.ensure_active()?;
        {
            let buffers = self.buffers.lock();
            if buffers.delete_set.contains(key) {
                return Ok(None);
            }
            if let Some(value) = buffers.write_cache.get(key) {
                return Ok(Some(value.clone()));
            }
        }
        Ok(self.read(key).await?.map(Versioned::into_value))
    }

    /// Whether `key` is visible to the transaction
    pub async fn contains_key(&self, key: &K) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Buffer a write; returns the value previously visible to the transaction
    pub async fn put(&self, key: K, value: V) -> Result<Option<V>> {
        let previous = self.get(&key).await?;
        let mut buffers = self.buffers.lock();
        buffers.delete_set.remove(&key);
        buffers.write_cache.insert(key, value);
        Ok(previous)
    }

    /// Buffer a write unless a value is visible; returns the visible value if any
    pub async fn put_if_absent(&self, key: K, value: V) -> Result<Option<V>> {
        match self.get(&key).await? {
            Some(existing) => Ok(Some(existing)),
            None => self.put(key, value).await,
        }
    }

    /// Buffer a removal; returns the value previously visible to the transaction
    pub async fn remove(&self, key: &K) -> Result<Option<V>> {
        let previous = self.get(key).await?;
        let mut buffers = self.buffers.lock();
        buffers.write_cache.remove(key);
        if buffers.read_cache.get(key).is_some_and(Option::is_some) {
            buffers.delete_set.insert(key.clone());
        }
        Ok(previous)
    }

    /// Buffer a removal only while `key` holds `value`
    pub async fn remove_value(&self, key: &K, value: &V) -> Result<bool> {
        if self.get(key).await?.as_ref() != Some(value) {
            return Ok(false);
        }
        self.remove(key).await?;
        Ok(true)
    }

    /// Buffer a write only while a value is visible
    pub async fn replace(&self, key: K, value: V) -> Result<Option<V>> {
        match self.get(&key).await? {
            Some(_) => self.put(key, value).await,
            None => Ok(None),
        }
    }

    /// Buffer a write only while `key` holds `old_value`
    pub async fn replace_value(&self, key: K, old_value: &V, new_value: V) -> Result<bool> {
        if self.get(&key).await?.as_ref() != Some(old_value) {
            return Ok(false);
        }
        self.put(key, new_value).await?;
        Ok(true)
    }

    /// Update log handed to the replica
    ///
    /// Removals and writes are conditioned on the version read; keys that were absent
    /// are conditioned on the lock version. Keys that were only read become locks.
    pub fn records(&self) -> Vec<MapUpdate<K, V>> {
        let lock_version = self.transaction.lock_version().map_or(0, |v| v.value());
        let buffers = self.buffers.lock();
        let read_version = |key: &K| {
            buffers
                .read_cache
                .get(key)
                .and_then(|read| read.as_ref().map(Versioned::version))
                .unwrap_or(lock_version)
        };

        let mut records = Vec::new();
        for key in &buffers.delete_set {
            records.push(MapUpdate::RemoveIfVersionMatch {
                key: key.clone(),
                version: read_version(key),
            });
        }
        for (key, value) in &buffers.write_cache {
            records.push(MapUpdate::PutIfVersionMatch {
                key: key.clone(),
                value: value.clone(),
                version: read_version(key),
            });
        }
        for key in buffers.read_cache.keys() {
            if !buffers.write_cache.contains_key(key) && !buffers.delete_set.contains(key) {
                records.push(MapUpdate::Lock {
                    key: key.clone(),
                    version: read_version(key),
                });
            }
        }
        records
    }

    async fn read(&self, key: &K) -> Result<Option<Versioned<V>>> {
        if let Some(cached) = self.buffers.lock().read_cache.get(key) {
            return Ok(cached.clone());
        }
        let fetched = self.transaction.replica().get(key).await?;
        let mut buffers = self.buffers.lock();
        Ok(buffers
            .read_cache
            .entry(key.clone())
            .or_insert(fetched)
            .clone())
    }

    fn ensure_active(&self) -> Result<()> {
        match self.transaction.state() {
            TransactionState::Active => Ok(()),
            state => Err(StrandError::transaction(format!(
                "{} is {state}; no further operations allowed",
                self.transaction.transaction_id()
            ))),
        }
    }
}

#[async_trait]
impl<K: StoreKey, V: StoreValue> TransactionParticipant for TransactionalMapParticipant<K, V> {
    fn participant_ref(&self) -> ParticipantRef {
        ParticipantRef {
            primitive: self.primitive.clone(),
            partition: self.partition,
        }
    }

    fn has_pending_updates(&self) -> bool {
        let buffers = self.buffers.lock();
        !buffers.write_cache.is_empty() || !buffers.delete_set.is_empty()
    }

    fn state(&self) -> TransactionState {
        self.transaction.state()
    }

    async fn prepare(&self) -> Result<bool> {
        self.transaction.prepare(self.records()).await
    }

    async fn prepare_and_commit(&self) -> Result<bool> {
        self.transaction.prepare_and_commit(self.records()).await
    }

    async fn commit(&self) -> Result<()> {
        self.transaction.commit().await
    }

    async fn rollback(&self) -> Result<()> {
        self.transaction.rollback().await
    }
}
