//! Strand Testing Infrastructure
//!
//! Shared fixtures for the Strand crates' tests: multi-node in-memory clusters for
//! gossip maps, in-memory and fault-injecting partitions for routers and
//! transactions, and proptest strategies.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! strand-testkit = { path = "../strand-testkit" }
//! ```
//!
//! ```rust,no_run
//! use strand_testkit::TestCluster;
//!
//! # async fn demo() {
//! let cluster = TestCluster::new(3);
//! let map = cluster.gossip_map::<String, String>(0, "demo").await;
//! map.put("k".into(), "v".into()).unwrap();
//! # }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod cluster;
pub mod faults;
pub mod logging;
pub mod partitions;
pub mod strategies;

pub use cluster::TestCluster;
pub use faults::{FaultInjectingPartition, FaultInjectingReplica, FaultPlan};
pub use logging::init_test_tracing;
pub use partitions::{keys_on_distinct_partitions, memory_creator, memory_partitions, partition_ids};
