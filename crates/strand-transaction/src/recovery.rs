//! Finishing transactions a coordinator left behind

use crate::registry::{TransactionRecord, TransactionRegistry};
use crate::state::TransactionState;
use std::sync::Arc;
use std::time::Duration;
use strand_core::effects::PrimitivePartition;
use strand_core::{Result, StrandError, TransactionId};
use strand_partition::FederatedPrimitiveCreator;
use tracing::{debug, info, warn};

/// Transactions handled by one recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Driven to commit
    pub committed: Vec<TransactionId>,
    /// Driven to rollback
    pub rolled_back: Vec<TransactionId>,
    /// Left in the registry for a later pass
    pub failed: Vec<TransactionId>,
}

impl RecoveryReport {
    /// Whether the pass found nothing to do
    pub fn is_empty(&self) -> bool {
        self.committed.is_empty() && self.rolled_back.is_empty() && self.failed.is_empty()
    }
}

/// Re-drives every transaction found in the registry
///
/// A transaction recorded as committing is committed on every recorded participant;
/// anything earlier is rolled back. The record is removed once every participant
/// has answered.
pub struct TransactionRecovery<P> {
    creator: Arc<FederatedPrimitiveCreator<P>>,
    registry: TransactionRegistry,
    timeout: Duration,
}

impl<P: PrimitivePartition> TransactionRecovery<P> {
    /// Recovery over the partitions of `creator`
    pub fn new(
        creator: Arc<FederatedPrimitiveCreator<P>>,
        registry: TransactionRegistry,
        timeout: Duration,
    ) -> Self {
        Self {
            creator,
            registry,
            timeout,
        }
    }

    /// Run one recovery pass over the registry
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        for (transaction_id, record) in self.registry.entries().await? {
            let commit = match record.state {
                TransactionState::Committing => true,
                TransactionState::Committed | TransactionState::RolledBack => {
                    self.registry.remove(&transaction_id).await?;
                    continue;
                }
                _ => false,
            };

            match self.complete(transaction_id, &record, commit).await {
                Ok(()) => {
                    self.registry.remove(&transaction_id).await?;
                    if commit {
                        report.committed.push(transaction_id);
                    } else {
                        report.rolled_back.push(transaction_id);
                    }
                }
                Err(err) => {
                    warn!(transaction = %transaction_id, state = %record.state, error = %err, "Recovery could not finish transaction");
                    report.failed.push(transaction_id);
                }
            }
        }

        if !report.is_empty() {
            info!(
                committed = report.committed.len(),
                rolled_back = report.rolled_back.len(),
                failed = report.failed.len(),
                "Transaction recovery pass finished"
            );
        }
        Ok(report)
    }

    async fn complete(
        &self,
        transaction_id: TransactionId,
        record: &TransactionRecord,
        commit: bool,
    ) -> Result<()> {
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        for participant in &record.participants {
            let partition = self.creator.partition(participant.partition).ok_or_else(|| {
                StrandError::not_found(format!("partition {}", participant.partition))
            })?;
            let Some(replica) = partition.transactional(&participant.primitive) else {
                debug!(transaction = %transaction_id, participant = %participant, "Replica not hosted; nothing to finish");
                continue;
            };

            let call = if commit {
                replica.commit(transaction_id)
            } else {
                replica.rollback(transaction_id)
            };
            tokio::time::timeout(self.timeout, call)
                .await
                .map_err(|_| StrandError::timeout(format!("recover {transaction_id}"), timeout_ms))??;
            debug!(transaction = %transaction_id, participant = %participant, commit, "Participant finished");
        }
        Ok(())
    }
}
