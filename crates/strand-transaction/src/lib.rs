//! # Strand Transaction - Two-Phase Commit over Partitioned Maps
//!
//! Multi-key, multi-partition transactions on top of strongly consistent partition
//! replicas:
//! - [`TransactionContext`] hands out [`PartitionedTransactionalMap`]s whose
//!   participants buffer reads and writes with repeatable-read semantics
//! - [`TransactionCoordinator`] commits through a single-participant fast path or
//!   full two-phase commit
//! - [`TransactionRegistry`] records two-phase decisions in a partitioned map so that
//!   [`TransactionRecovery`] can finish transactions a coordinator left behind

#![forbid(unsafe_code)]

pub mod coordinator;
pub mod manager;
pub mod map;
pub mod participant;
pub mod recovery;
pub mod registry;
pub mod state;
pub mod transaction;

pub use coordinator::TransactionCoordinator;
pub use manager::{TransactionContext, TransactionManager};
pub use map::PartitionedTransactionalMap;
pub use participant::{ParticipantRef, TransactionParticipant, TransactionalMapParticipant};
pub use recovery::{RecoveryReport, TransactionRecovery};
pub use registry::{TransactionRecord, TransactionRegistry};
pub use state::{CommitStatus, TransactionState};
pub use transaction::Transaction;
