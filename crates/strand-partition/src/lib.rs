//! # Strand Partition - Key and Name Routing
//!
//! Spreads strongly consistent primitives over a fixed set of partitions:
//! - [`Hasher`]: stable BLAKE3 placement of keys and primitive names
//! - [`PartitionedConsistentMap`]: single-key routing and whole-map fan-out
//! - [`DistributedAtomicCounter`]: counters pinned to one partition by name
//! - [`DistributedLeaderElector`]: leader electors pinned the same way
//! - [`FederatedPrimitiveCreator`]: builds and caches primitives by name

#![forbid(unsafe_code)]

pub mod cache;
pub mod counter;
pub mod elector;
pub mod federated;
pub mod hasher;
pub mod map;

pub use cache::{PrimitiveCache, PrimitiveKind};
pub use counter::DistributedAtomicCounter;
pub use elector::DistributedLeaderElector;
pub use federated::FederatedPrimitiveCreator;
pub use hasher::{hash_bytes, Hasher};
pub use map::PartitionedConsistentMap;
