//! Effect traits for the collaborators Strand depends on
//!
//! Transport, membership, clocks, partition replicas and local map storage are
//! injected through these traits. Reference implementations live in `strand-effects`.

pub mod membership;
pub mod network;
pub mod replica;
pub mod storage;
pub mod time;

pub use membership::{ClusterMembershipEffects, NodeState};
pub use network::{ClusterCommunicationEffects, MessageHandler, NetworkError};
pub use replica::{
    AtomicCounterEffects, LeaderElectorEffects, PartitionReplica, PrimitivePartition,
    TransactionalReplica,
};
pub use storage::MapStorageEffects;
pub use time::{PhysicalTimeEffects, TimestampProvider};
