//! # Strand Effects
//!
//! Reference implementations of the `strand-core` effect traits. Everything here runs
//! in process memory and is meant for tests, simulation and the `strand` CLI:
//!
//! - [`transport`]: an in-memory cluster network with link and node fault injection
//! - [`membership`]: a shared static membership table
//! - [`time`]: system and simulated wall clocks, logical and wall-clock write timestamps
//! - [`replica`]: an in-memory partition whose maps implement the transactional
//!   replica contract, next to atomic counters and leader electors
//! - [`storage`]: in-memory and filesystem stores backing persistent gossip maps

#![forbid(unsafe_code)]

pub mod membership;
pub mod replica;
pub mod storage;
pub mod time;
pub mod transport;

pub use membership::{MembershipView, MemoryClusterMembership};
pub use replica::{MemoryAtomicCounter, MemoryConsistentMap, MemoryLeaderElector, MemoryPartition};
pub use storage::{FilesystemMapStorage, MemoryMapStorage};
pub use time::{LogicalClock, SimulatedClock, SystemClock, WallClockTimestamps};
pub use transport::{MemoryClusterEndpoint, MemoryClusterNetwork};
