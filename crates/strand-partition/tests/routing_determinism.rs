//! Partition Routing Tests
//!
//! Placement is a pure function of the key and the partition set, so two routers
//! built over the same partitions agree on every key.

use std::sync::Arc;
use strand_core::effects::{LeaderElectorEffects, PrimitivePartition};
use strand_core::PartitionId;
use strand_effects::MemoryPartition;
use strand_partition::{FederatedPrimitiveCreator, Hasher};

fn partitions(n: u32) -> Vec<Arc<MemoryPartition>> {
    (1..=n)
        .map(|id| Arc::new(MemoryPartition::new(PartitionId(id))))
        .collect()
}

#[test]
fn independent_routers_agree_on_placement() {
    let a = Hasher::new((1..=5).map(PartitionId)).unwrap();
    let b = Hasher::new((1..=5).rev().map(PartitionId)).unwrap();

    for key in 0..500u64 {
        assert_eq!(a.partition_for(&key).unwrap(), b.partition_for(&key).unwrap());
    }
}

#[tokio::test]
async fn same_partition_keys_share_a_replica() {
    let shared = partitions(3);
    let first = FederatedPrimitiveCreator::new(shared.clone()).unwrap();
    let second = FederatedPrimitiveCreator::new(shared.clone()).unwrap();

    let writer = first.consistent_map::<String, String>("routes").unwrap();
    let reader = second.consistent_map::<String, String>("routes").unwrap();

    for i in 0..30 {
        writer.put(format!("key-{i}"), format!("value-{i}")).await.unwrap();
    }
    for i in 0..30 {
        let key = format!("key-{i}");
        let value = reader.get(&key).await.unwrap().unwrap().into_value();
        assert_eq!(value, format!("value-{i}"));
    }

    let mut total = 0;
    for partition in &shared {
        total += partition
            .consistent_map::<String, String>("routes")
            .unwrap()
            .size()
            .await
            .unwrap();
    }
    assert_eq!(total, 30);
}

#[test]
fn name_placement_is_shared_by_every_creator() {
    let first = FederatedPrimitiveCreator::new(partitions(4)).unwrap();
    let second = FederatedPrimitiveCreator::new(partitions(4)).unwrap();

    for name in ["hits", "sessions", "jobs", "leases"] {
        assert_eq!(
            first.atomic_counter(name).unwrap().partition(),
            second.atomic_counter(name).unwrap().partition()
        );
    }
}

#[tokio::test]
async fn elector_state_lives_on_its_pinned_partition() {
    let shared = partitions(4);
    let first = FederatedPrimitiveCreator::new(shared.clone()).unwrap();
    let second = FederatedPrimitiveCreator::new(shared.clone()).unwrap();

    let elector = first.leader_elector("mastership").unwrap();
    let peer = second.leader_elector("mastership").unwrap();
    assert_eq!(elector.partition(), peer.partition());

    let a = strand_core::NodeId::new("node-a");
    let b = strand_core::NodeId::new("node-b");
    elector.run("device-7", a.clone()).await.unwrap();
    let seen = peer.run("device-7", b.clone()).await.unwrap();
    assert!(seen.is_leader(&a));
    assert_eq!(seen.candidates, vec![a.clone(), b.clone()]);

    peer.withdraw("device-7", &a).await.unwrap();
    assert_eq!(elector.leader("device-7").await.unwrap(), Some(b));

    for partition in &shared {
        let topics = partition
            .leader_elector("mastership")
            .unwrap()
            .leaderships()
            .await
            .unwrap();
        if partition.id() == elector.partition() {
            assert_eq!(topics.len(), 1);
        } else {
            assert!(topics.is_empty());
        }
    }
}
