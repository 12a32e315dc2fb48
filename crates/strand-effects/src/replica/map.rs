//! In-memory consistent map replica
//!
//! Stands in for the consensus-replicated state machine of one partition. Every command
//! advances a per-map index that doubles as the version stamped on written entries.
//! Transactions lock their keys at prepare time: plain writes to a prepared key fail,
//! and a second transaction touching it fails to prepare. While any transaction is open,
//! removals leave versioned tombstones behind so optimistic version checks still see
//! them; tombstones older than every open transaction are discarded.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use strand_core::effects::{PartitionReplica, TransactionalReplica};
use strand_core::{
    MapUpdate, Result, StoreKey, StoreValue, StrandError, TransactionId, TransactionLog, Version,
    Versioned,
};
use tracing::debug;

enum Entry<V> {
    Live { value: V, version: u64 },
    Tombstone { version: u64 },
}

impl<V: Clone> Entry<V> {
    fn version(&self) -> u64 {
        match self {
            Self::Live { version, .. } | Self::Tombstone { version } => *version,
        }
    }

    fn is_tombstone(&self) -> bool {
        matches!(self, Self::Tombstone { .. })
    }

    fn value(&self) -> Option<&V> {
        match self {
            Self::Live { value, .. } => Some(value),
            Self::Tombstone { .. } => None,
        }
    }

    fn to_versioned(&self) -> Option<Versioned<V>> {
        match self {
            Self::Live { value, version } => Some(Versioned::new(value.clone(), *version)),
            Self::Tombstone { .. } => None,
        }
    }
}

struct TransactionScope<K, V> {
    version: u64,
    log: Option<TransactionLog<MapUpdate<K, V>>>,
}

enum ValueMatch<'a, V> {
    Any,
    Absent,
    Present,
    Equals(&'a V),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateStatus {
    Ok,
    Noop,
    WriteLock,
    PreconditionFailed,
}

struct UpdateResult<V> {
    status: UpdateStatus,
    old: Option<Versioned<V>>,
    new: Option<Versioned<V>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrepareResult {
    Ok,
    ConcurrentTransaction,
    OptimisticLockFailure,
    PartialFailure,
}

impl fmt::Display for PrepareResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ok => "ok",
            Self::ConcurrentTransaction => "key prepared by a concurrent transaction",
            Self::OptimisticLockFailure => "version changed since read",
            Self::PartialFailure => "transaction was not begun on this replica",
        };
        f.write_str(text)
    }
}

struct MapState<K, V> {
    entries: HashMap<K, Entry<V>>,
    prepared_keys: HashSet<K>,
    active: HashMap<TransactionId, TransactionScope<K, V>>,
    index: u64,
    current_version: u64,
}

impl<K: StoreKey, V: StoreValue> MapState<K, V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            prepared_keys: HashSet::new(),
            active: HashMap::new(),
            index: 0,
            current_version: 0,
        }
    }

    fn next_index(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    fn update(
        &mut self,
        key: K,
        new_value: Option<V>,
        value_match: ValueMatch<'_, V>,
        version_match: Option<u64>,
    ) -> UpdateResult<V> {
        let old = self.entries.get(&key).and_then(Entry::to_versioned);
        let live = old.is_some();

        if !live && new_value.is_none() {
            return UpdateResult {
                status: UpdateStatus::Noop,
                old,
                new: None,
            };
        }
        if self.prepared_keys.contains(&key) {
            return UpdateResult {
                status: UpdateStatus::WriteLock,
                new: old.clone(),
                old,
            };
        }

        let value_ok = match value_match {
            ValueMatch::Any => true,
            ValueMatch::Absent => !live,
            ValueMatch::Present => live,
            ValueMatch::Equals(expected) => old.as_ref().is_some_and(|o| o.value() == expected),
        };
        let version_ok =
            version_match.map_or(true, |v| old.as_ref().is_some_and(|o| o.version() == v));
        if !(value_ok && version_ok) {
            return UpdateResult {
                status: UpdateStatus::PreconditionFailed,
                new: old.clone(),
                old,
            };
        }

        let version = self.next_index();
        self.current_version = version;
        let new = match new_value {
            Some(value) => {
                self.entries.insert(
                    key,
                    Entry::Live {
                        value: value.clone(),
                        version,
                    },
                );
                Some(Versioned::new(value, version))
            }
            None => {
                if self.active.is_empty() {
                    self.entries.remove(&key);
                } else {
                    self.entries.insert(key, Entry::Tombstone { version });
                }
                None
            }
        };
        UpdateResult {
            status: UpdateStatus::Ok,
            old,
            new,
        }
    }

    fn begin(&mut self, transaction_id: TransactionId) -> Version {
        let version = self.next_index();
        self.active.insert(
            transaction_id,
            TransactionScope { version, log: None },
        );
        Version(version)
    }

    fn validate(&self, log: &TransactionLog<MapUpdate<K, V>>) -> PrepareResult {
        for record in &log.records {
            let key = match record.key() {
                Some(key) => key,
                None => {
                    if self.current_version > record.version() {
                        return PrepareResult::OptimisticLockFailure;
                    }
                    continue;
                }
            };
            if self.prepared_keys.contains(key) {
                return PrepareResult::ConcurrentTransaction;
            }
            let stale = match self.entries.get(key) {
                None => record.version() != log.version,
                Some(existing) => existing.version() > record.version(),
            };
            if stale {
                return PrepareResult::OptimisticLockFailure;
            }
        }
        PrepareResult::Ok
    }

    fn prepare(&mut self, log: TransactionLog<MapUpdate<K, V>>) -> PrepareResult {
        self.next_index();
        let result = self.validate(&log);
        if result != PrepareResult::Ok {
            return result;
        }

        for record in &log.records {
            if let Some(key) = record.key() {
                self.prepared_keys.insert(key.clone());
            }
        }
        match self.active.get_mut(&log.transaction_id) {
            Some(scope) => {
                scope.log = Some(log);
                PrepareResult::Ok
            }
            None => {
                self.active.insert(
                    log.transaction_id,
                    TransactionScope {
                        version: log.version,
                        log: Some(log),
                    },
                );
                PrepareResult::PartialFailure
            }
        }
    }

    fn apply(&mut self, scope: TransactionScope<K, V>) {
        let Some(log) = scope.log else {
            return;
        };
        let version = self.next_index();
        self.current_version = version;
        let retain_tombstones = !self.active.is_empty();

        for record in log.records {
            match record {
                MapUpdate::VersionMatch { .. } => {}
                MapUpdate::Lock { key, .. } => {
                    self.prepared_keys.remove(&key);
                }
                MapUpdate::PutIfVersionMatch { key, value, .. } => {
                    self.prepared_keys.remove(&key);
                    self.entries.insert(key, Entry::Live { value, version });
                }
                MapUpdate::RemoveIfVersionMatch { key, .. } => {
                    self.prepared_keys.remove(&key);
                    if retain_tombstones {
                        self.entries.insert(key, Entry::Tombstone { version });
                    } else {
                        self.entries.remove(&key);
                    }
                }
            }
        }
    }

    fn release(&mut self, scope: &TransactionScope<K, V>) {
        if let Some(log) = &scope.log {
            for record in &log.records {
                if let Some(key) = record.key() {
                    self.prepared_keys.remove(key);
                }
            }
        }
    }

    fn discard_tombstones(&mut self) {
        match self.active.values().map(|scope| scope.version).min() {
            None => self.entries.retain(|_, entry| !entry.is_tombstone()),
            Some(low_watermark) => self
                .entries
                .retain(|_, entry| !(entry.is_tombstone() && entry.version() < low_watermark)),
        }
    }

    fn live_entries(&self) -> impl Iterator<Item = (&K, &Entry<V>)> {
        self.entries.iter().filter(|(_, entry)| !entry.is_tombstone())
    }
}

/// In-memory consistent map hosted by a [`MemoryPartition`](super::MemoryPartition)
pub struct MemoryConsistentMap<K, V> {
    name: String,
    state: Mutex<MapState<K, V>>,
}

impl<K: StoreKey, V: StoreValue> MemoryConsistentMap<K, V> {
    /// Create an empty map
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MapState::new()),
        }
    }

    /// Number of transactions begun and not yet completed
    pub fn active_transactions(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Number of keys locked by prepared transactions
    pub fn prepared_key_count(&self) -> usize {
        self.state.lock().prepared_keys.len()
    }

    /// Number of retained tombstones
    pub fn tombstone_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .values()
            .filter(|entry| entry.is_tombstone())
            .count()
    }

    fn update(
        &self,
        key: K,
        new_value: Option<V>,
        value_match: ValueMatch<'_, V>,
        version_match: Option<u64>,
    ) -> Result<UpdateResult<V>> {
        let result = self
            .state
            .lock()
            .update(key, new_value, value_match, version_match);
        if result.status == UpdateStatus::WriteLock {
            return Err(StrandError::concurrent_modification(format!(
                "key in map '{}' is locked by a prepared transaction",
                self.name
            )));
        }
        Ok(result)
    }
}

#[async_trait]
impl<K: StoreKey, V: StoreValue> TransactionalReplica for MemoryConsistentMap<K, V> {
    async fn commit(&self, transaction_id: TransactionId) -> Result<()> {
        let mut state = self.state.lock();
        match state.active.remove(&transaction_id) {
            Some(scope) => {
                state.apply(scope);
                state.discard_tombstones();
            }
            None => {
                debug!(map = %self.name, transaction = %transaction_id, "Commit of unknown transaction ignored");
            }
        }
        Ok(())
    }

    async fn rollback(&self, transaction_id: TransactionId) -> Result<()> {
        let mut state = self.state.lock();
        state.next_index();
        match state.active.remove(&transaction_id) {
            Some(scope) => {
                state.release(&scope);
                state.discard_tombstones();
            }
            None => {
                debug!(map = %self.name, transaction = %transaction_id, "Rollback of unknown transaction ignored");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<K: StoreKey, V: StoreValue> PartitionReplica<K, V> for MemoryConsistentMap<K, V> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.state.lock().live_entries().count())
    }

    async fn contains_key(&self, key: &K) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_tombstone()))
    }

    async fn contains_value(&self, value: &V) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .live_entries()
            .any(|(_, entry)| entry.value() == Some(value)))
    }

    async fn get(&self, key: &K) -> Result<Option<Versioned<V>>> {
        Ok(self.state.lock().entries.get(key).and_then(Entry::to_versioned))
    }

    async fn put(&self, key: K, value: V) -> Result<Option<Versioned<V>>> {
        Ok(self.update(key, Some(value), ValueMatch::Any, None)?.old)
    }

    async fn put_and_get(&self, key: K, value: V) -> Result<Versioned<V>> {
        self.update(key, Some(value), ValueMatch::Any, None)?
            .new
            .ok_or_else(|| StrandError::internal("put produced no value"))
    }

    async fn put_if_absent(&self, key: K, value: V) -> Result<Option<Versioned<V>>> {
        let result = self.update(key, Some(value), ValueMatch::Absent, None)?;
        Ok(match result.status {
            UpdateStatus::Ok => None,
            _ => result.old,
        })
    }

    async fn remove(&self, key: &K) -> Result<Option<Versioned<V>>> {
        Ok(self.update(key.clone(), None, ValueMatch::Any, None)?.old)
    }

    async fn remove_value(&self, key: &K, value: &V) -> Result<bool> {
        let result = self.update(key.clone(), None, ValueMatch::Equals(value), None)?;
        Ok(result.status == UpdateStatus::Ok)
    }

    async fn remove_version(&self, key: &K, version: u64) -> Result<bool> {
        let result = self.update(key.clone(), None, ValueMatch::Any, Some(version))?;
        Ok(result.status == UpdateStatus::Ok)
    }

    async fn replace(&self, key: K, value: V) -> Result<Option<Versioned<V>>> {
        let result = self.update(key, Some(value), ValueMatch::Present, None)?;
        Ok(match result.status {
            UpdateStatus::Ok => result.old,
            _ => None,
        })
    }

    async fn replace_value(&self, key: K, old_value: &V, new_value: V) -> Result<bool> {
        let result = self.update(key, Some(new_value), ValueMatch::Equals(old_value), None)?;
        Ok(result.status == UpdateStatus::Ok)
    }

    async fn replace_version(&self, key: K, version: u64, new_value: V) -> Result<bool> {
        let result = self.update(key, Some(new_value), ValueMatch::Any, Some(version))?;
        Ok(result.status == UpdateStatus::Ok)
    }

    async fn key_set(&self) -> Result<HashSet<K>> {
        Ok(self
            .state
            .lock()
            .live_entries()
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn values(&self) -> Result<Vec<Versioned<V>>> {
        Ok(self
            .state
            .lock()
            .live_entries()
            .filter_map(|(_, entry)| entry.to_versioned())
            .collect())
    }

    async fn entry_set(&self) -> Result<Vec<(K, Versioned<V>)>> {
        Ok(self
            .state
            .lock()
            .live_entries()
            .filter_map(|(key, entry)| entry.to_versioned().map(|v| (key.clone(), v)))
            .collect())
    }

    /// Keys locked by a prepared transaction survive a clear.
    async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.next_index();
        let MapState {
            entries,
            prepared_keys,
            ..
        } = &mut *state;
        entries.retain(|key, _| prepared_keys.contains(key));
        Ok(())
    }

    async fn begin(&self, transaction_id: TransactionId) -> Result<Version> {
        Ok(self.state.lock().begin(transaction_id))
    }

    async fn prepare(&self, log: TransactionLog<MapUpdate<K, V>>) -> Result<bool> {
        let transaction_id = log.transaction_id;
        let result = self.state.lock().prepare(log);
        if result != PrepareResult::Ok {
            debug!(map = %self.name, transaction = %transaction_id, reason = %result, "Prepare rejected");
        }
        Ok(result == PrepareResult::Ok)
    }

    async fn prepare_and_commit(&self, log: TransactionLog<MapUpdate<K, V>>) -> Result<bool> {
        let transaction_id = log.transaction_id;
        let mut state = self.state.lock();
        let result = state.prepare(log);
        if let Some(scope) = state.active.remove(&transaction_id) {
            match result {
                PrepareResult::Ok => state.apply(scope),
                PrepareResult::PartialFailure => state.release(&scope),
                _ => {}
            }
        }
        state.discard_tombstones();
        drop(state);

        if result != PrepareResult::Ok {
            debug!(map = %self.name, transaction = %transaction_id, reason = %result, "Prepare-and-commit rejected");
        }
        Ok(result == PrepareResult::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> MemoryConsistentMap<String, String> {
        MemoryConsistentMap::new("test")
    }

    fn s(value: &str) -> String {
        value.to_string()
    }

    fn put_record(key: &str, value: &str, version: u64) -> MapUpdate<String, String> {
        MapUpdate::PutIfVersionMatch {
            key: s(key),
            value: s(value),
            version,
        }
    }

    #[tokio::test]
    async fn test_versions_increase_per_write() {
        let map = map();
        let first = map.put_and_get(s("a"), s("1")).await.unwrap();
        let second = map.put_and_get(s("a"), s("2")).await.unwrap();
        assert!(second.version() > first.version());

        let previous = map.put(s("a"), s("3")).await.unwrap().unwrap();
        assert_eq!(previous, second);
    }

    #[tokio::test]
    async fn test_conditional_operations() {
        let map = map();
        assert!(map.put_if_absent(s("a"), s("1")).await.unwrap().is_none());
        let existing = map.put_if_absent(s("a"), s("2")).await.unwrap().unwrap();
        assert_eq!(existing.value(), "1");

        assert!(!map.replace_value(s("a"), &s("x"), s("2")).await.unwrap());
        assert!(map.replace_value(s("a"), &s("1"), s("2")).await.unwrap());

        let current = map.get(&s("a")).await.unwrap().unwrap();
        assert!(!map.remove_version(&s("a"), current.version() + 1).await.unwrap());
        assert!(map
            .replace_version(s("a"), current.version(), s("3"))
            .await
            .unwrap());

        assert!(map.replace(s("missing"), s("v")).await.unwrap().is_none());
        assert!(!map.contains_key(&s("missing")).await.unwrap());
        assert!(map.remove_value(&s("a"), &s("3")).await.unwrap());
        assert!(map.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_prepare_and_commit_applies_records() {
        let map = map();
        let tx = TransactionId::new();
        let lock = map.begin(tx).await.unwrap();

        let log = TransactionLog::new(tx, lock.value(), vec![put_record("a", "1", lock.value())]);
        assert!(map.prepare_and_commit(log).await.unwrap());
        assert_eq!(map.get(&s("a")).await.unwrap().unwrap().value(), "1");
        assert_eq!(map.active_transactions(), 0);
        assert_eq!(map.prepared_key_count(), 0);
    }

    #[tokio::test]
    async fn test_prepared_keys_are_write_locked() {
        let map = map();
        let tx = TransactionId::new();
        let lock = map.begin(tx).await.unwrap();
        let log = TransactionLog::new(tx, lock.value(), vec![put_record("a", "1", lock.value())]);
        assert!(map.prepare(log).await.unwrap());

        let err = map.put(s("a"), s("plain")).await.unwrap_err();
        assert!(matches!(err, StrandError::ConcurrentModification { .. }));
        assert!(map.put(s("b"), s("other key")).await.is_ok());

        map.commit(tx).await.unwrap();
        assert_eq!(map.get(&s("a")).await.unwrap().unwrap().value(), "1");
        assert!(map.put(s("a"), s("plain")).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_prepare_is_rejected() {
        let map = map();
        let first = TransactionId::new();
        let second = TransactionId::new();
        let first_lock = map.begin(first).await.unwrap();
        let second_lock = map.begin(second).await.unwrap();

        let first_log = TransactionLog::new(
            first,
            first_lock.value(),
            vec![put_record("a", "1", first_lock.value())],
        );
        let second_log = TransactionLog::new(
            second,
            second_lock.value(),
            vec![put_record("a", "2", second_lock.value())],
        );
        assert!(map.prepare(first_log).await.unwrap());
        assert!(!map.prepare(second_log).await.unwrap());

        map.rollback(first).await.unwrap();
        map.rollback(second).await.unwrap();
        assert_eq!(map.prepared_key_count(), 0);
        assert!(map.get(&s("a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_read_fails_prepare() {
        let map = map();
        let read = map.put_and_get(s("a"), s("1")).await.unwrap();
        let tx = TransactionId::new();
        let lock = map.begin(tx).await.unwrap();

        map.put(s("a"), s("concurrent")).await.unwrap();

        let log = TransactionLog::new(tx, lock.value(), vec![put_record("a", "2", read.version())]);
        assert!(!map.prepare(log).await.unwrap());
        assert_eq!(map.prepared_key_count(), 0);
    }

    #[tokio::test]
    async fn test_insert_after_begin_fails_prepare() {
        let map = map();
        let tx = TransactionId::new();
        let lock = map.begin(tx).await.unwrap();
        map.put(s("a"), s("racer")).await.unwrap();

        let log = TransactionLog::new(tx, lock.value(), vec![put_record("a", "mine", lock.value())]);
        assert!(!map.prepare_and_commit(log).await.unwrap());
        assert_eq!(map.get(&s("a")).await.unwrap().unwrap().value(), "racer");
    }

    #[tokio::test]
    async fn test_tombstones_retained_while_transactions_active() {
        let map = map();
        let read = map.put_and_get(s("a"), s("1")).await.unwrap();
        let tx = TransactionId::new();
        let lock = map.begin(tx).await.unwrap();

        map.remove(&s("a")).await.unwrap();
        assert_eq!(map.tombstone_count(), 1);
        assert!(!map.contains_key(&s("a")).await.unwrap());

        let log = TransactionLog::new(
            tx,
            lock.value(),
            vec![MapUpdate::RemoveIfVersionMatch {
                key: s("a"),
                version: read.version(),
            }],
        );
        assert!(!map.prepare(log).await.unwrap());

        map.rollback(tx).await.unwrap();
        assert_eq!(map.tombstone_count(), 0);
    }

    #[tokio::test]
    async fn test_prepare_without_begin_is_partial_failure() {
        let map = map();
        let tx = TransactionId::new();
        let log = TransactionLog::new(tx, 0, vec![put_record("a", "1", 0)]);

        assert!(!map.prepare(log.clone()).await.unwrap());
        map.rollback(tx).await.unwrap();
        assert_eq!(map.prepared_key_count(), 0);

        assert!(!map.prepare_and_commit(log).await.unwrap());
        assert_eq!(map.prepared_key_count(), 0);
    }

    #[tokio::test]
    async fn test_version_match_record() {
        let map = map();
        let tx = TransactionId::new();
        let lock = map.begin(tx).await.unwrap();
        map.put(s("z"), s("bump")).await.unwrap();

        let log: TransactionLog<MapUpdate<String, String>> = TransactionLog::new(
            tx,
            lock.value(),
            vec![MapUpdate::VersionMatch {
                version: lock.value(),
            }],
        );
        assert!(!map.prepare(log).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_transaction_completion_is_noop() {
        let map = map();
        map.commit(TransactionId::new()).await.unwrap();
        map.rollback(TransactionId::new()).await.unwrap();
        assert_eq!(map.active_transactions(), 0);
    }

    #[tokio::test]
    async fn test_clear_keeps_prepared_keys() {
        let map = map();
        map.put(s("a"), s("1")).await.unwrap();
        let tx = TransactionId::new();
        let lock = map.begin(tx).await.unwrap();
        map.put(s("b"), s("2")).await.unwrap();
        let read_b = map.get(&s("b")).await.unwrap().unwrap();
        let log = TransactionLog::new(
            tx,
            lock.value(),
            vec![MapUpdate::Lock {
                key: s("b"),
                version: read_b.version(),
            }],
        );
        assert!(map.prepare(log).await.unwrap());

        map.clear().await.unwrap();
        assert_eq!(map.key_set().await.unwrap(), HashSet::from([s("b")]));
    }
}
