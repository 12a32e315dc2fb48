//! One transaction against one partition replica

use crate::state::TransactionState;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use strand_core::effects::PartitionReplica;
use strand_core::{
    MapUpdate, Result, StoreKey, StoreValue, StrandError, TransactionId, TransactionLog, Version,
};
use tracing::{debug, trace};

/// Drives the replica side of a transaction and enforces the state machine
///
/// Every replica call is bounded by the operation timeout; a call that times out is
/// reported as [`StrandError::Timeout`].
pub struct Transaction<K, V> {
    transaction_id: TransactionId,
    replica: Arc<dyn PartitionReplica<K, V>>,
    timeout: Duration,
    state: Mutex<TransactionState>,
    lock_version: Mutex<Option<Version>>,
}

impl<K: StoreKey, V: StoreValue> Transaction<K, V> {
    /// Scope of `transaction_id` on `replica`, not yet begun
    pub fn new(
        transaction_id: TransactionId,
        replica: Arc<dyn PartitionReplica<K, V>>,
        timeout: Duration,
    ) -> Self {
        Self {
            transaction_id,
            replica,
            timeout,
            state: Mutex::new(TransactionState::Active),
            lock_version: Mutex::new(None),
        }
    }

    /// Transaction this scope belongs to
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Partition replica the scope is open on
    pub fn replica(&self) -> &Arc<dyn PartitionReplica<K, V>> {
        &self.replica
    }

    /// Current protocol state
    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    /// Lock version obtained by [`Self::begin`]
    pub fn lock_version(&self) -> Option<Version> {
        *self.lock_version.lock()
    }

    /// Acquire the lock version from the replica
    pub async fn begin(&self) -> Result<Version> {
        if self.state() != TransactionState::Active {
            return Err(StrandError::transaction(format!(
                "{} cannot begin in state {}",
                self.transaction_id,
                self.state()
            )));
        }
        let version = self
            .bounded("begin", self.replica.begin(self.transaction_id))
            .await?;
        *self.lock_version.lock() = Some(version);
        trace!(transaction = %self.transaction_id, map = self.replica.name(), version = version.value(), "Transaction begun");
        Ok(version)
    }

    /// Validate and lock `records` on the replica
    pub async fn prepare(&self, records: Vec<MapUpdate<K, V>>) -> Result<bool> {
        self.transition(TransactionState::Preparing)?;
        let log = self.log(records)?;
        let prepared = self.bounded("prepare", self.replica.prepare(log)).await?;
        if prepared {
            self.transition(TransactionState::Prepared)?;
        }
        debug!(transaction = %self.transaction_id, map = self.replica.name(), prepared, "Prepare finished");
        Ok(prepared)
    }

    /// Validate and apply `records` in one step
    pub async fn prepare_and_commit(&self, records: Vec<MapUpdate<K, V>>) -> Result<bool> {
        self.transition(TransactionState::Preparing)?;
        let log = self.log(records)?;
        let committed = self
            .bounded("prepare_and_commit", self.replica.prepare_and_commit(log))
            .await?;
        if committed {
            self.transition(TransactionState::Committing)?;
            self.transition(TransactionState::Committed)?;
        } else {
            self.transition(TransactionState::RollingBack)?;
            self.transition(TransactionState::RolledBack)?;
        }
        debug!(transaction = %self.transaction_id, map = self.replica.name(), committed, "Prepare-and-commit finished");
        Ok(committed)
    }

    /// Apply the prepared log; may be repeated while committing
    pub async fn commit(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                TransactionState::Committing => {}
                TransactionState::Committed => return Ok(()),
                _ => state.transition(TransactionState::Committing)?,
            }
        }
        self.bounded("commit", self.replica.commit(self.transaction_id))
            .await?;
        self.transition(TransactionState::Committed)
    }

    /// Release the transaction on the replica; may be repeated while rolling back
    pub async fn rollback(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                TransactionState::RollingBack => {}
                TransactionState::RolledBack => return Ok(()),
                _ => state.transition(TransactionState::RollingBack)?,
            }
        }
        self.bounded("rollback", self.replica.rollback(self.transaction_id))
            .await?;
        self.transition(TransactionState::RolledBack)
    }

    fn transition(&self, next: TransactionState) -> Result<()> {
        self.state.lock().transition(next)
    }

    fn log(&self, records: Vec<MapUpdate<K, V>>) -> Result<TransactionLog<MapUpdate<K, V>>> {
        let version = self.lock_version().ok_or_else(|| {
            StrandError::transaction(format!("{} was never begun", self.transaction_id))
        })?;
        Ok(TransactionLog::new(self.transaction_id, version.value(), records))
    }

    async fn bounded<T>(&self, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| StrandError::timeout(format!("{operation} {}", self.transaction_id), timeout_ms))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_effects::MemoryConsistentMap;

    fn transaction(map: &Arc<MemoryConsistentMap<String, u32>>) -> Transaction<String, u32> {
        Transaction::new(TransactionId::new(), map.clone(), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_prepare_requires_begin() {
        let map = Arc::new(MemoryConsistentMap::new("m"));
        let tx = transaction(&map);
        assert!(tx.prepare(Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_two_phase_commit_applies_writes() {
        let map = Arc::new(MemoryConsistentMap::new("m"));
        let tx = transaction(&map);
        let version = tx.begin().await.unwrap();

        let records = vec![MapUpdate::PutIfVersionMatch {
            key: "k".to_string(),
            value: 1,
            version: version.value(),
        }];
        assert!(tx.prepare(records).await.unwrap());
        assert_eq!(tx.state(), TransactionState::Prepared);

        tx.commit().await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);
        assert_eq!(map.get(&"k".to_string()).await.unwrap().unwrap().into_value(), 1);
    }

    #[tokio::test]
    async fn test_rollback_after_commit_is_rejected() {
        let map = Arc::new(MemoryConsistentMap::new("m"));
        let tx = transaction(&map);
        tx.begin().await.unwrap();
        assert!(tx.prepare_and_commit(Vec::new()).await.unwrap());
        assert!(tx.rollback().await.is_err());
    }

    #[tokio::test]
    async fn test_failed_fast_path_ends_rolled_back() {
        let map = Arc::new(MemoryConsistentMap::new("m"));
        let tx = transaction(&map);
        let version = tx.begin().await.unwrap();
        map.put("k".to_string(), 9).await.unwrap();

        let records = vec![MapUpdate::PutIfVersionMatch {
            key: "k".to_string(),
            value: 1,
            version: version.value(),
        }];
        assert!(!tx.prepare_and_commit(records).await.unwrap());
        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert_eq!(map.get(&"k".to_string()).await.unwrap().unwrap().into_value(), 9);
    }
}
