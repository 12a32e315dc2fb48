//! Transaction contexts over a federated primitive creator

use crate::coordinator::TransactionCoordinator;
use crate::map::PartitionedTransactionalMap;
use crate::participant::TransactionParticipant;
use crate::recovery::{RecoveryReport, TransactionRecovery};
use crate::registry::TransactionRegistry;
use crate::state::CommitStatus;
use futures::future::join_all;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use strand_core::effects::PrimitivePartition;
use strand_core::{Result, StoreKey, StoreValue, StrandError, TransactionConfig, TransactionId};
use strand_partition::FederatedPrimitiveCreator;
use tracing::{debug, info, warn};

/// Opens transactions and recovers the ones left unfinished
pub struct TransactionManager<P> {
    creator: Arc<FederatedPrimitiveCreator<P>>,
    registry: TransactionRegistry,
    config: TransactionConfig,
}

impl<P: PrimitivePartition> TransactionManager<P> {
    /// Manager whose registry is the partitioned map named in `config`
    pub fn new(creator: Arc<FederatedPrimitiveCreator<P>>, config: TransactionConfig) -> Result<Self> {
        config.validate()?;
        let registry = TransactionRegistry::new(creator.consistent_map(&config.registry_name)?);
        Ok(Self {
            creator,
            registry,
            config,
        })
    }

    /// Registry recording two-phase decisions
    pub fn registry(&self) -> &TransactionRegistry {
        &self.registry
    }

    /// Creator the transactional maps are opened from
    pub fn creator(&self) -> &Arc<FederatedPrimitiveCreator<P>> {
        &self.creator
    }

    /// Open a transaction with a fresh id
    pub fn new_context(&self) -> TransactionContext<P> {
        let transaction_id = TransactionId::new();
        debug!(transaction = %transaction_id, "Opening transaction");
        TransactionContext {
            transaction_id,
            creator: self.creator.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            maps: tokio::sync::Mutex::new(HashMap::new()),
            participants: Mutex::new(Vec::new()),
            phase: Mutex::new(ContextPhase::Open),
        }
    }

    /// Recovery over this manager's registry
    pub fn recovery(&self) -> TransactionRecovery<P> {
        TransactionRecovery::new(
            self.creator.clone(),
            self.registry.clone(),
            self.config.operation_timeout(),
        )
    }

    /// Run one recovery pass
    pub async fn recover(&self) -> Result<RecoveryReport> {
        self.recovery().recover().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextPhase {
    Open,
    Committed,
    Aborted,
}

/// One client transaction
///
/// Maps opened through the context buffer their operations until [`Self::commit`].
/// A context commits at most once; [`Self::abort`] releases an uncommitted one. Dropping
/// an open context rolls its participants back on the current Tokio runtime.
pub struct TransactionContext<P> {
    transaction_id: TransactionId,
    creator: Arc<FederatedPrimitiveCreator<P>>,
    registry: TransactionRegistry,
    config: TransactionConfig,
    maps: tokio::sync::Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    participants: Mutex<Vec<Arc<dyn TransactionParticipant>>>,
    phase: Mutex<ContextPhase>,
}

impl<P: PrimitivePartition> TransactionContext<P> {
    /// Id shared by every participant of this transaction
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Whether neither commit nor abort has run
    pub fn is_open(&self) -> bool {
        *self.phase.lock() == ContextPhase::Open
    }

    /// Transactional view of map `name`, begun on every partition on first use
    pub async fn transactional_map<K: StoreKey, V: StoreValue>(
        &self,
        name: &str,
    ) -> Result<Arc<PartitionedTransactionalMap<K, V>>> {
        let mut maps = self.maps.lock().await;
        self.ensure_open()?;
        if let Some(existing) = maps.get(name) {
            return existing
                .clone()
                .downcast::<PartitionedTransactionalMap<K, V>>()
                .map_err(|_| {
                    StrandError::invalid(format!(
                        "map '{name}' already opened with different key/value types"
                    ))
                });
        }

        let map = self.creator.consistent_map::<K, V>(name)?;
        let transactional = Arc::new(
            PartitionedTransactionalMap::begin(
                self.transaction_id,
                &map,
                self.config.operation_timeout(),
            )
            .await?,
        );
        self.participants
            .lock()
            .extend(transactional.participants());
        maps.insert(name.to_string(), transactional.clone());
        Ok(transactional)
    }

    /// Commit every buffered update atomically
    pub async fn commit(&self) -> Result<CommitStatus> {
        let _maps = self.maps.lock().await;
        self.close(ContextPhase::Committed)?;
        let participants = self.participants.lock().clone();
        TransactionCoordinator::new(
            self.transaction_id,
            self.registry.clone(),
            self.config.clone(),
        )
        .commit(&participants)
        .await
    }

    /// Roll back every participant of an uncommitted transaction
    pub async fn abort(&self) -> Result<()> {
        let _maps = self.maps.lock().await;
        self.close(ContextPhase::Aborted)?;
        let participants = self.participants.lock().clone();
        let results = join_all(participants.iter().map(|participant| participant.rollback())).await;
        for err in results.into_iter().filter_map(|result| result.err()) {
            debug!(transaction = %self.transaction_id, error = %err, "Rollback during abort failed");
        }
        info!(transaction = %self.transaction_id, participants = participants.len(), "Transaction aborted");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        match *self.phase.lock() {
            ContextPhase::Open => Ok(()),
            phase => Err(StrandError::transaction(format!(
                "{} is already {phase:?}",
                self.transaction_id
            ))),
        }
    }

    fn close(&self, next: ContextPhase) -> Result<()> {
        let mut phase = self.phase.lock();
        if *phase != ContextPhase::Open {
            return Err(StrandError::transaction(format!(
                "{} is already {:?}",
                self.transaction_id, *phase
            )));
        }
        *phase = next;
        Ok(())
    }
}

impl<P> Drop for TransactionContext<P> {
    fn drop(&mut self) {
        let phase = self.phase.get_mut();
        if *phase != ContextPhase::Open {
            return;
        }
        *phase = ContextPhase::Aborted;
        let participants = std::mem::take(self.participants.get_mut());
        if participants.is_empty() {
            return;
        }

        let transaction_id = self.transaction_id;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(transaction = %transaction_id, participants = participants.len(), "Open transaction dropped outside a runtime; scopes left open");
            return;
        };
        debug!(transaction = %transaction_id, participants = participants.len(), "Rolling back dropped transaction");
        runtime.spawn(async move {
            let results = join_all(participants.iter().map(|participant| participant.rollback())).await;
            for err in results.into_iter().filter_map(|result| result.err()) {
                debug!(transaction = %transaction_id, error = %err, "Rollback of dropped transaction failed");
            }
        });
    }
}
