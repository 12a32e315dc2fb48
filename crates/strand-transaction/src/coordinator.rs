//! Two-phase commit across transaction participants

use crate::participant::{ParticipantRef, TransactionParticipant};
use crate::registry::TransactionRegistry;
use crate::state::{CommitStatus, TransactionState};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use strand_core::{Result, TransactionConfig, TransactionId};
use tracing::{debug, info, warn};

/// Commits one transaction over its participants
///
/// Participants without pending updates take no part in the protocol and are released
/// once the outcome is known. With no writers the commit trivially succeeds; a single
/// writer uses the replica's combined prepare-and-commit; anything more runs two-phase
/// commit with every decision recorded in the [`TransactionRegistry`] first.
pub struct TransactionCoordinator {
    transaction_id: TransactionId,
    registry: TransactionRegistry,
    config: TransactionConfig,
}

impl TransactionCoordinator {
    /// Coordinator for `transaction_id`, recording its decisions in `registry`
    pub fn new(
        transaction_id: TransactionId,
        registry: TransactionRegistry,
        config: TransactionConfig,
    ) -> Self {
        Self {
            transaction_id,
            registry,
            config,
        }
    }

    /// Run the commit protocol
    ///
    /// Returns `Failure` when any participant fails to prepare; everything is rolled
    /// back in that case. An error means the registry could not record the decision
    /// and the transaction was rolled back. Once the commit decision is durable the
    /// outcome is `Success`, and commits that still fail are left to recovery.
    pub async fn commit(
        &self,
        participants: &[Arc<dyn TransactionParticipant>],
    ) -> Result<CommitStatus> {
        let (writers, readers): (Vec<_>, Vec<_>) = participants
            .iter()
            .cloned()
            .partition(|participant| participant.has_pending_updates());

        let outcome = match writers.len() {
            0 => Ok(CommitStatus::Success),
            1 => Ok(self.fast_path(&writers[0]).await),
            _ => self.two_phase_commit(&writers).await,
        };

        self.release(&readers).await;
        match &outcome {
            Ok(status) => {
                info!(transaction = %self.transaction_id, writers = writers.len(), ?status, "Transaction finished")
            }
            Err(err) => {
                warn!(transaction = %self.transaction_id, error = %err, "Transaction aborted")
            }
        }
        outcome
    }

    async fn fast_path(&self, participant: &Arc<dyn TransactionParticipant>) -> CommitStatus {
        match participant.prepare_and_commit().await {
            Ok(true) => CommitStatus::Success,
            Ok(false) => CommitStatus::Failure,
            Err(err) => {
                debug!(transaction = %self.transaction_id, participant = %participant.participant_ref(), error = %err, "Prepare-and-commit failed");
                if let Err(err) = participant.rollback().await {
                    debug!(transaction = %self.transaction_id, error = %err, "Rollback after failed fast path failed");
                }
                CommitStatus::Failure
            }
        }
    }

    async fn two_phase_commit(
        &self,
        writers: &[Arc<dyn TransactionParticipant>],
    ) -> Result<CommitStatus> {
        let refs: Vec<ParticipantRef> = writers.iter().map(|p| p.participant_ref()).collect();

        if let Err(err) = self
            .registry
            .put(self.transaction_id, TransactionState::Preparing, &refs)
            .await
        {
            self.rollback_all(writers).await;
            return Err(err);
        }

        let prepared = join_all(writers.iter().map(|participant| async move {
            match participant.prepare().await {
                Ok(prepared) => prepared,
                Err(err) => {
                    debug!(transaction = %self.transaction_id, participant = %participant.participant_ref(), error = %err, "Prepare failed");
                    false
                }
            }
        }))
        .await;

        if !prepared.iter().all(|prepared| *prepared) {
            if let Err(err) = self
                .registry
                .put(self.transaction_id, TransactionState::RollingBack, &refs)
                .await
            {
                debug!(transaction = %self.transaction_id, error = %err, "Failed to record rollback decision");
            }
            if self.rollback_all(writers).await {
                self.forget().await;
            }
            return Ok(CommitStatus::Failure);
        }

        if let Err(err) = self
            .registry
            .put(self.transaction_id, TransactionState::Committing, &refs)
            .await
        {
            if self.rollback_all(writers).await {
                self.forget().await;
            }
            return Err(err);
        }

        let committed = join_all(writers.iter().map(|participant| {
            self.retry("commit", participant, || participant.commit())
        }))
        .await;
        if committed.iter().all(|committed| *committed) {
            self.forget().await;
        } else {
            warn!(transaction = %self.transaction_id, "Some participants did not commit; leaving them to recovery");
        }
        Ok(CommitStatus::Success)
    }

    /// Roll back every participant; returns whether all of them succeeded
    async fn rollback_all(&self, participants: &[Arc<dyn TransactionParticipant>]) -> bool {
        let results = join_all(participants.iter().map(|participant| {
            self.retry("rollback", participant, || participant.rollback())
        }))
        .await;
        results.iter().all(|ok| *ok)
    }

    async fn release(&self, readers: &[Arc<dyn TransactionParticipant>]) {
        for participant in readers {
            if let Err(err) = participant.rollback().await {
                debug!(transaction = %self.transaction_id, participant = %participant.participant_ref(), error = %err, "Failed to release read-only participant");
            }
        }
    }

    async fn forget(&self) {
        if let Err(err) = self.registry.remove(&self.transaction_id).await {
            debug!(transaction = %self.transaction_id, error = %err, "Failed to remove transaction record");
        }
    }

    async fn retry<F, Fut>(
        &self,
        operation: &str,
        participant: &Arc<dyn TransactionParticipant>,
        call: F,
    ) -> bool
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let attempts = self.config.completion_retries.saturating_add(1);
        for attempt in 1..=attempts {
            match call().await {
                Ok(()) => return true,
                Err(err) => {
                    debug!(
                        transaction = %self.transaction_id,
                        participant = %participant.participant_ref(),
                        operation,
                        attempt,
                        error = %err,
                        "Completion call failed"
                    );
                }
            }
        }
        false
    }
}
