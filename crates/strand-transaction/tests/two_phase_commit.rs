//! Two-Phase Commit Tests
//!
//! Cross-partition transactions over fault-injecting in-memory partitions:
//! atomicity, the single-writer fast path, optimistic conflicts, registry failures
//! and recovery.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use strand_core::{PartitionId, StrandError, TransactionConfig, TransactionId};
use strand_partition::{FederatedPrimitiveCreator, PartitionedConsistentMap};
use strand_testkit::{
    init_test_tracing, keys_on_distinct_partitions, FaultInjectingPartition, FaultPlan,
};
use strand_transaction::{
    CommitStatus, PartitionedTransactionalMap, TransactionCoordinator, TransactionManager,
    TransactionRegistry, TransactionState,
};

const MAP: &str = "accounts";

struct Fixture {
    partitions: Vec<Arc<FaultInjectingPartition>>,
    creator: Arc<FederatedPrimitiveCreator<FaultInjectingPartition>>,
    manager: TransactionManager<FaultInjectingPartition>,
    keys: BTreeMap<PartitionId, String>,
}

impl Fixture {
    fn new(partitions: u32) -> Self {
        init_test_tracing();
        let partitions: Vec<_> = (1..=partitions)
            .map(|id| Arc::new(FaultInjectingPartition::new(PartitionId(id))))
            .collect();
        let creator = Arc::new(FederatedPrimitiveCreator::new(partitions.clone()).unwrap());
        let config = TransactionConfig {
            operation_timeout_ms: 200,
            completion_retries: 1,
            ..TransactionConfig::default()
        };
        let manager = TransactionManager::new(creator.clone(), config).unwrap();
        let keys = keys_on_distinct_partitions(creator.hasher());
        Self {
            partitions,
            creator,
            manager,
            keys,
        }
    }

    fn key(&self, partition: u32) -> String {
        self.keys[&PartitionId(partition)].clone()
    }

    fn partition(&self, partition: u32) -> &FaultInjectingPartition {
        &self.partitions[(partition - 1) as usize]
    }

    fn map(&self) -> Arc<PartitionedConsistentMap<String, String>> {
        self.creator.consistent_map(MAP).unwrap()
    }

    async fn value(&self, key: &str) -> Option<String> {
        self.map()
            .get(&key.to_string())
            .await
            .unwrap()
            .map(|versioned| versioned.into_value())
    }

    /// Transaction scopes still open on the map's replicas
    fn open_scopes(&self) -> usize {
        self.partitions
            .iter()
            .map(|partition| {
                partition
                    .inner()
                    .memory_map::<String, String>(MAP)
                    .unwrap()
                    .active_transactions()
            })
            .sum()
    }

    async fn wait_for_open_scopes(&self, expected: usize) {
        for _ in 0..50 {
            if self.open_scopes() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(self.open_scopes(), expected);
    }

    /// Write `value` under every key in one transaction
    async fn write_all(&self, keys: &[String], value: &str) -> CommitStatus {
        let context = self.manager.new_context();
        let map = context.transactional_map::<String, String>(MAP).await.unwrap();
        for key in keys {
            map.put(key.clone(), value.to_string()).await.unwrap();
        }
        context.commit().await.unwrap()
    }
}

// ============================================================================
// Atomicity
// ============================================================================

#[tokio::test]
async fn cross_partition_commit_applies_every_write() {
    let fixture = Fixture::new(3);
    let keys: Vec<String> = fixture.keys.values().cloned().collect();

    assert_eq!(fixture.write_all(&keys, "v1").await, CommitStatus::Success);

    for key in &keys {
        assert_eq!(fixture.value(key).await, Some("v1".to_string()));
    }
    assert!(fixture.manager.registry().entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_prepare_leaves_no_partial_writes() {
    let fixture = Fixture::new(2);
    let keys = [fixture.key(1), fixture.key(2)];
    fixture.partition(2).set_plan(FaultPlan {
        fail_prepare: true,
        ..FaultPlan::default()
    });

    assert_eq!(fixture.write_all(&keys, "v1").await, CommitStatus::Failure);

    fixture.partition(2).heal();
    assert_eq!(fixture.value(&keys[0]).await, None);
    assert_eq!(fixture.value(&keys[1]).await, None);
    assert!(fixture.manager.registry().entries().await.unwrap().is_empty());

    // The rollback released partition 1's locks.
    assert_eq!(fixture.write_all(&keys, "v2").await, CommitStatus::Success);
    assert_eq!(fixture.value(&keys[0]).await, Some("v2".to_string()));
}

#[tokio::test]
async fn slow_prepare_times_out_and_rolls_back() {
    let fixture = Fixture::new(2);
    let keys = [fixture.key(1), fixture.key(2)];
    fixture.partition(2).set_plan(FaultPlan {
        prepare_delay: Some(Duration::from_secs(5)),
        ..FaultPlan::default()
    });

    assert_eq!(fixture.write_all(&keys, "v1").await, CommitStatus::Failure);

    fixture.partition(2).heal();
    assert_eq!(fixture.value(&keys[0]).await, None);
    assert_eq!(fixture.value(&keys[1]).await, None);
}

// ============================================================================
// Fast path and read-only transactions
// ============================================================================

#[tokio::test]
async fn single_writer_commits_without_registry() {
    let fixture = Fixture::new(2);
    let key = fixture.key(1);

    // Seed the other partition so the transaction also has a reader there.
    fixture.map().put(fixture.key(2), "seed".to_string()).await.unwrap();

    let context = fixture.manager.new_context();
    let map = context.transactional_map::<String, String>(MAP).await.unwrap();
    assert_eq!(map.get(&fixture.key(2)).await.unwrap(), Some("seed".to_string()));
    map.put(key.clone(), "fast".to_string()).await.unwrap();

    let writers = map
        .participants()
        .iter()
        .filter(|participant| participant.has_pending_updates())
        .count();
    assert_eq!(writers, 1);

    assert_eq!(context.commit().await.unwrap(), CommitStatus::Success);
    assert_eq!(fixture.value(&key).await, Some("fast".to_string()));

    for participant in map.participants() {
        assert!(participant.state().is_terminal());
    }
}

#[tokio::test]
async fn fast_path_matches_two_phase_outcome() {
    let fixture = Fixture::new(2);
    let fast = fixture.key(1);
    let keys = [fixture.key(1), fixture.key(2)];

    assert_eq!(fixture.write_all(&[fast.clone()], "one").await, CommitStatus::Success);
    assert_eq!(fixture.write_all(&keys, "two").await, CommitStatus::Success);

    assert_eq!(fixture.value(&fast).await, Some("two".to_string()));
    assert_eq!(fixture.value(&keys[1]).await, Some("two".to_string()));
}

#[tokio::test]
async fn read_only_transaction_succeeds_without_changes() {
    let fixture = Fixture::new(2);
    fixture.map().put(fixture.key(1), "x".to_string()).await.unwrap();

    let context = fixture.manager.new_context();
    let map = context.transactional_map::<String, String>(MAP).await.unwrap();
    assert_eq!(map.get(&fixture.key(1)).await.unwrap(), Some("x".to_string()));
    assert!(!map.contains_key(&fixture.key(2)).await.unwrap());

    assert_eq!(context.commit().await.unwrap(), CommitStatus::Success);
    assert_eq!(fixture.map().size().await.unwrap(), 1);

    // Readers were released, so plain writes go through.
    fixture.map().put(fixture.key(1), "y".to_string()).await.unwrap();
}

// ============================================================================
// Optimistic concurrency
// ============================================================================

#[tokio::test]
async fn concurrent_write_after_read_fails_commit() {
    let fixture = Fixture::new(2);
    let key = fixture.key(1);
    fixture.map().put(key.clone(), "1".to_string()).await.unwrap();

    let context = fixture.manager.new_context();
    let map = context.transactional_map::<String, String>(MAP).await.unwrap();
    let read = map.get(&key).await.unwrap();
    assert_eq!(read, Some("1".to_string()));

    fixture.map().put(key.clone(), "outside".to_string()).await.unwrap();

    // Repeatable read: the transaction still sees its first read.
    assert_eq!(map.get(&key).await.unwrap(), Some("1".to_string()));
    map.put(key.clone(), "2".to_string()).await.unwrap();

    assert_eq!(context.commit().await.unwrap(), CommitStatus::Failure);
    assert_eq!(fixture.value(&key).await, Some("outside".to_string()));
}

#[tokio::test]
async fn concurrent_insert_of_absent_key_fails_commit() {
    let fixture = Fixture::new(2);
    let keys = [fixture.key(1), fixture.key(2)];

    let context = fixture.manager.new_context();
    let map = context.transactional_map::<String, String>(MAP).await.unwrap();
    assert_eq!(map.put_if_absent(keys[0].clone(), "tx".to_string()).await.unwrap(), None);
    map.put(keys[1].clone(), "tx".to_string()).await.unwrap();

    fixture.map().put(keys[0].clone(), "outside".to_string()).await.unwrap();

    assert_eq!(context.commit().await.unwrap(), CommitStatus::Failure);
    assert_eq!(fixture.value(&keys[0]).await, Some("outside".to_string()));
    assert_eq!(fixture.value(&keys[1]).await, None);
}

#[tokio::test]
async fn removals_commit_across_partitions() {
    let fixture = Fixture::new(2);
    let keys = [fixture.key(1), fixture.key(2)];
    assert_eq!(fixture.write_all(&keys, "v").await, CommitStatus::Success);

    let context = fixture.manager.new_context();
    let map = context.transactional_map::<String, String>(MAP).await.unwrap();
    assert_eq!(map.remove(&keys[0]).await.unwrap(), Some("v".to_string()));
    assert!(map.remove_value(&keys[1], &"v".to_string()).await.unwrap());
    assert_eq!(map.get(&keys[0]).await.unwrap(), None);

    assert_eq!(context.commit().await.unwrap(), CommitStatus::Success);
    assert!(fixture.map().is_empty().await.unwrap());
}

// ============================================================================
// Context lifecycle
// ============================================================================

#[tokio::test]
async fn context_commits_at_most_once() {
    let fixture = Fixture::new(2);
    let context = fixture.manager.new_context();
    let map = context.transactional_map::<String, String>(MAP).await.unwrap();
    map.put(fixture.key(1), "v".to_string()).await.unwrap();

    assert_eq!(context.commit().await.unwrap(), CommitStatus::Success);
    assert!(!context.is_open());
    assert!(matches!(context.commit().await, Err(StrandError::Transaction { .. })));
    assert!(matches!(context.abort().await, Err(StrandError::Transaction { .. })));
    assert!(matches!(
        context.transactional_map::<String, String>(MAP).await,
        Err(StrandError::Transaction { .. })
    ));
}

#[tokio::test]
async fn abort_discards_buffered_writes() {
    let fixture = Fixture::new(2);
    let context = fixture.manager.new_context();
    let map = context.transactional_map::<String, String>(MAP).await.unwrap();
    map.put(fixture.key(1), "v".to_string()).await.unwrap();
    map.put(fixture.key(2), "v".to_string()).await.unwrap();

    context.abort().await.unwrap();

    assert!(fixture.map().is_empty().await.unwrap());
    assert!(matches!(context.commit().await, Err(StrandError::Transaction { .. })));
}

#[tokio::test]
async fn map_reopened_with_other_types_is_rejected() {
    let fixture = Fixture::new(2);
    let context = fixture.manager.new_context();
    let first = context.transactional_map::<String, String>(MAP).await.unwrap();
    let again = context.transactional_map::<String, String>(MAP).await.unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    assert!(matches!(
        context.transactional_map::<String, u64>(MAP).await,
        Err(StrandError::Invalid { .. })
    ));
}

#[tokio::test]
async fn dropped_context_releases_partition_scopes() {
    let fixture = Fixture::new(2);
    {
        let context = fixture.manager.new_context();
        let map = context.transactional_map::<String, String>(MAP).await.unwrap();
        map.put(fixture.key(1), "abandoned".to_string()).await.unwrap();
        assert_eq!(fixture.open_scopes(), 2);
    }

    fixture.wait_for_open_scopes(0).await;
    assert_eq!(fixture.value(&fixture.key(1)).await, None);
}

#[tokio::test]
async fn commit_waits_for_map_still_beginning() {
    let fixture = Fixture::new(2);
    fixture.partition(1).set_plan(FaultPlan {
        begin_delay: Some(Duration::from_millis(50)),
        ..FaultPlan::default()
    });
    let context = fixture.manager.new_context();

    let (opened, committed) = tokio::join!(
        context.transactional_map::<String, String>(MAP),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            context.commit().await
        },
    );

    assert!(opened.is_ok());
    assert_eq!(committed.unwrap(), CommitStatus::Success);
    assert_eq!(fixture.open_scopes(), 0);
    assert!(context.transactional_map::<String, String>(MAP).await.is_err());
}

#[tokio::test]
async fn failed_begin_releases_scopes_on_other_partitions() {
    let fixture = Fixture::new(2);
    fixture.map();
    fixture.partition(2).set_plan(FaultPlan {
        unavailable: true,
        ..FaultPlan::default()
    });
    let context = fixture.manager.new_context();

    assert!(context.transactional_map::<String, String>(MAP).await.is_err());
    fixture.partition(2).heal();
    assert_eq!(fixture.open_scopes(), 0);
}

// ============================================================================
// Registry failures
// ============================================================================

#[tokio::test]
async fn unreachable_registry_aborts_two_phase_commit_only() {
    let fixture = Fixture::new(2);
    let broken = FaultInjectingPartition::new(PartitionId(1));
    broken.set_plan(FaultPlan {
        unavailable: true,
        ..FaultPlan::default()
    });
    let broken_creator = FederatedPrimitiveCreator::new([Arc::new(broken)]).unwrap();
    let registry = TransactionRegistry::new(broken_creator.consistent_map("registry").unwrap());
    let map = fixture.map();
    let config = TransactionConfig::default();

    // Two writers: the Preparing record cannot be written.
    let transaction_id = TransactionId::new();
    let transaction =
        PartitionedTransactionalMap::begin(transaction_id, &map, config.operation_timeout())
            .await
            .unwrap();
    transaction.put(fixture.key(1), "a".to_string()).await.unwrap();
    transaction.put(fixture.key(2), "b".to_string()).await.unwrap();
    let coordinator = TransactionCoordinator::new(transaction_id, registry.clone(), config.clone());
    let err = coordinator.commit(&transaction.participants()).await.unwrap_err();
    assert!(matches!(err, StrandError::Network { .. }));
    assert!(map.is_empty().await.unwrap());
    for participant in transaction.participants() {
        assert_eq!(participant.state(), TransactionState::RolledBack);
    }

    // One writer never touches the registry.
    let transaction_id = TransactionId::new();
    let transaction =
        PartitionedTransactionalMap::begin(transaction_id, &map, config.operation_timeout())
            .await
            .unwrap();
    transaction.put(fixture.key(1), "a".to_string()).await.unwrap();
    let coordinator = TransactionCoordinator::new(transaction_id, registry, config);
    assert_eq!(
        coordinator.commit(&transaction.participants()).await.unwrap(),
        CommitStatus::Success
    );
    assert_eq!(fixture.value(&fixture.key(1)).await, Some("a".to_string()));
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test]
async fn recovery_finishes_commit_left_by_failed_participant() {
    let fixture = Fixture::new(2);
    let keys = [fixture.key(1), fixture.key(2)];
    fixture.partition(2).set_plan(FaultPlan {
        fail_commit: true,
        ..FaultPlan::default()
    });

    // The decision was recorded, so the transaction counts as committed.
    assert_eq!(fixture.write_all(&keys, "v").await, CommitStatus::Success);
    assert_eq!(fixture.value(&keys[0]).await, Some("v".to_string()));

    let pending = fixture.manager.registry().entries().await.unwrap();
    assert_eq!(pending.len(), 1);
    let (transaction_id, record) = &pending[0];
    assert_eq!(record.state, TransactionState::Committing);
    assert_eq!(record.participants.len(), 2);

    // Still failing: the record stays for a later pass.
    let report = fixture.manager.recover().await.unwrap();
    assert_eq!(report.failed, vec![*transaction_id]);

    fixture.partition(2).heal();
    assert_eq!(fixture.value(&keys[1]).await, None);

    let report = fixture.manager.recover().await.unwrap();
    assert_eq!(report.committed, vec![*transaction_id]);
    assert!(report.failed.is_empty());
    assert_eq!(fixture.value(&keys[1]).await, Some("v".to_string()));
    assert!(fixture.manager.registry().entries().await.unwrap().is_empty());

    // Nothing left to do.
    assert!(fixture.manager.recover().await.unwrap().is_empty());
}

#[tokio::test]
async fn recovery_rolls_back_transaction_stuck_in_prepare() {
    let fixture = Fixture::new(2);
    let keys = [fixture.key(1), fixture.key(2)];

    // A coordinator that prepared both partitions and then disappeared.
    let context = fixture.manager.new_context();
    let map = context.transactional_map::<String, String>(MAP).await.unwrap();
    map.put(keys[0].clone(), "lost".to_string()).await.unwrap();
    map.put(keys[1].clone(), "lost".to_string()).await.unwrap();
    let writers: Vec<_> = map
        .participants()
        .into_iter()
        .filter(|participant| participant.has_pending_updates())
        .collect();
    let refs: Vec<_> = writers.iter().map(|p| p.participant_ref()).collect();
    fixture
        .manager
        .registry()
        .put(context.transaction_id(), TransactionState::Preparing, &refs)
        .await
        .unwrap();
    for participant in &writers {
        assert!(participant.prepare().await.unwrap());
    }
    // A crashed coordinator never runs its destructors.
    drop(map);
    std::mem::forget(context);

    // Prepared keys are locked.
    assert_eq!(fixture.write_all(&keys, "next").await, CommitStatus::Failure);

    let report = fixture.manager.recover().await.unwrap();
    assert_eq!(report.rolled_back.len(), 1);
    assert!(fixture.manager.registry().entries().await.unwrap().is_empty());

    assert_eq!(fixture.write_all(&keys, "next").await, CommitStatus::Success);
    assert_eq!(fixture.value(&keys[0]).await, Some("next".to_string()));
    assert_eq!(fixture.value(&keys[1]).await, Some("next".to_string()));
}
