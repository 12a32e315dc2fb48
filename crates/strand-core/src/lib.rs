//! # Strand Core
//!
//! Foundation types for the Strand distributed primitives layer: identifiers,
//! write timestamps, replicated value wrappers, transaction log records, the unified
//! error type, configuration, and the effect traits through which every external
//! collaborator (transport, membership, clocks, partition replicas) is injected.
//!
//! This crate has no runtime behavior of its own. Implementations of the effect traits
//! live in `strand-effects`; the gossip map, partition router and transaction
//! coordinator build on top of these types.

#![forbid(unsafe_code)]

pub mod config;
pub mod effects;
pub mod election;
pub mod errors;
pub mod identifiers;
pub mod serialization;
pub mod time;
pub mod transaction;
pub mod values;

pub use config::{GossipConfig, PartitionConfig, StrandConfig, TransactionConfig};
pub use election::{Leader, Leadership};
pub use errors::{Result, StrandError};
pub use identifiers::{MessageSubject, NodeId, PartitionId, TransactionId};
pub use time::Timestamp;
pub use transaction::{MapUpdate, TransactionLog};
pub use values::{Digest, MapValue, StoreKey, StoreValue, Version, Versioned};
