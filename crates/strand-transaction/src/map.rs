//! Transactional view of a partitioned map

use crate::participant::{TransactionParticipant, TransactionalMapParticipant};
use futures::future::{join_all, try_join_all};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use strand_core::{PartitionId, Result, StoreKey, StoreValue, StrandError, TransactionId};
use strand_partition::{Hasher, PartitionedConsistentMap};

/// One transaction's view of a partitioned map
///
/// Holds one participant per partition and routes each key to the participant of the
/// partition that owns it.
pub struct PartitionedTransactionalMap<K, V> {
    name: String,
    hasher: Hasher,
    participants: BTreeMap<PartitionId, Arc<TransactionalMapParticipant<K, V>>>,
}

impl<K: StoreKey, V: StoreValue> PartitionedTransactionalMap<K, V> {
    /// Begin `transaction_id` on every partition of `map`
    pub async fn begin(
        transaction_id: TransactionId,
        map: &PartitionedConsistentMap<K, V>,
        timeout: Duration,
    ) -> Result<Self> {
        let participants: BTreeMap<_, _> = map
            .replicas()
            .iter()
            .map(|(partition, replica)| {
                let participant = TransactionalMapParticipant::new(
                    transaction_id,
                    map.name(),
                    *partition,
                    replica.clone(),
                    timeout,
                );
                (*partition, Arc::new(participant))
            })
            .collect();

        if let Err(err) =
            try_join_all(participants.values().map(|participant| participant.begin())).await
        {
            // Scopes opened on the other partitions would otherwise pin their tombstones.
            join_all(participants.values().map(|participant| participant.rollback())).await;
            return Err(err);
        }

        Ok(Self {
            name: map.name().to_string(),
            hasher: map.hasher().clone(),
            participants,
        })
    }

    /// Map name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Participants as seen by the coordinator
    pub fn participants(&self) -> Vec<Arc<dyn TransactionParticipant>> {
        self.participants
            .values()
            .map(|participant| {
                let participant: Arc<dyn TransactionParticipant> = participant.clone();
                participant
            })
            .collect()
    }

    /// Participant owning `key`
    pub fn participant_for(&self, key: &K) -> Result<&Arc<TransactionalMapParticipant<K, V>>> {
        let partition = self.hasher.partition_for(key)?;
        self.participants.get(&partition).ok_or_else(|| {
            StrandError::internal(format!("no participant of '{}' on {partition}", self.name))
        })
    }

    /// Value of `key` as the transaction sees it
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        self.participant_for(key)?.get(key).await
    }

    /// Whether `key` is visible to the transaction
    pub async fn contains_key(&self, key: &K) -> Result<bool> {
        self.participant_for(key)?.contains_key(key).await
    }

    /// Buffer a write of `key`
    pub async fn put(&self, key: K, value: V) -> Result<Option<V>> {
        self.participant_for(&key)?.put(key, value).await
    }

    /// Buffer a write of `key` unless it already has a value
    pub async fn put_if_absent(&self, key: K, value: V) -> Result<Option<V>> {
        self.participant_for(&key)?.put_if_absent(key, value).await
    }

    /// Buffer the removal of `key`
    pub async fn remove(&self, key: &K) -> Result<Option<V>> {
        self.participant_for(key)?.remove(key).await
    }

    /// Buffer the removal of `key` if it holds `value`
    pub async fn remove_value(&self, key: &K, value: &V) -> Result<bool> {
        self.participant_for(key)?.remove_value(key, value).await
    }

    /// Buffer a write of `key` only if it already has a value
    pub async fn replace(&self, key: K, value: V) -> Result<Option<V>> {
        self.participant_for(&key)?.replace(key, value).await
    }

    /// Buffer a write of `key` if it holds `old_value`
    pub async fn replace_value(&self, key: K, old_value: &V, new_value: V) -> Result<bool> {
        self.participant_for(&key)?
            .replace_value(key, old_value, new_value)
            .await
    }
}
