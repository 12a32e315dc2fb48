//! Durable record of in-flight two-phase commits

use crate::participant::ParticipantRef;
use crate::state::TransactionState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strand_core::{Result, TransactionId};
use strand_partition::PartitionedConsistentMap;
use tracing::trace;

/// What recovery needs to finish a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Last durable coordinator state
    pub state: TransactionState,
    /// Replicas holding the transaction's prepared updates
    pub participants: Vec<ParticipantRef>,
}

/// Transaction records kept in a partitioned consistent map keyed by transaction id
#[derive(Clone)]
pub struct TransactionRegistry {
    records: Arc<PartitionedConsistentMap<TransactionId, TransactionRecord>>,
}

impl TransactionRegistry {
    /// Registry backed by `records`
    pub fn new(records: Arc<PartitionedConsistentMap<TransactionId, TransactionRecord>>) -> Self {
        Self { records }
    }

    /// Record `transaction_id` in `state`
    pub async fn put(
        &self,
        transaction_id: TransactionId,
        state: TransactionState,
        participants: &[ParticipantRef],
    ) -> Result<()> {
        trace!(transaction = %transaction_id, %state, "Recording transaction state");
        let record = TransactionRecord {
            state,
            participants: participants.to_vec(),
        };
        self.records.put(transaction_id, record).await?;
        Ok(())
    }

    /// Record of `transaction_id`, if any
    pub async fn get(&self, transaction_id: &TransactionId) -> Result<Option<TransactionRecord>> {
        Ok(self
            .records
            .get(transaction_id)
            .await?
            .map(|versioned| versioned.into_value()))
    }

    /// Forget `transaction_id`
    pub async fn remove(&self, transaction_id: &TransactionId) -> Result<()> {
        self.records.remove(transaction_id).await?;
        Ok(())
    }

    /// Every recorded transaction
    pub async fn entries(&self) -> Result<Vec<(TransactionId, TransactionRecord)>> {
        Ok(self
            .records
            .entry_set()
            .await?
            .into_iter()
            .map(|(id, versioned)| (id, versioned.into_value()))
            .collect())
    }

    /// Name of the backing map
    pub fn name(&self) -> &str {
        self.records.name()
    }
}
