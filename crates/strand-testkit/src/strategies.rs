//! Property test strategies for Strand types

use proptest::prelude::*;

// Re-export proptest for convenience
pub use proptest;

use strand_core::{MapValue, NodeId, PartitionId, Timestamp};

/// Logical or wall-clock timestamps over a small range so that collisions occur
pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
    prop_oneof![
        (0u64..50).prop_map(Timestamp::logical),
        (0u64..50, 0u32..4).prop_map(|(unix_ms, sequence)| Timestamp::wall_clock(unix_ms, sequence)),
    ]
}

/// Live values and tombstones with colliding timestamps
pub fn arb_map_value() -> impl Strategy<Value = MapValue<u32>> {
    (arb_timestamp(), proptest::option::of(any::<u32>())).prop_map(|(timestamp, value)| match value {
        Some(value) => MapValue::new(value, timestamp, 0),
        None => MapValue::tombstone(timestamp, 0),
    })
}

/// Node ids `node-0..node-9`
pub fn arb_node_id() -> impl Strategy<Value = NodeId> {
    (0u8..10).prop_map(|i| NodeId::new(format!("node-{i}")))
}

/// Partition ids `1..=16`
pub fn arb_partition_id() -> impl Strategy<Value = PartitionId> {
    (1u32..=16).prop_map(PartitionId)
}
