//! # Strand Anti-Entropy - Gossip Replicated Map
//!
//! An eventually consistent key-value map replicated on every node:
//! - Local writes stamped by a pluggable timestamp provider and resolved
//!   last-writer-wins, with tombstones winning timestamp ties
//! - Eager push of changes to peers through per-peer batching accumulators
//! - Periodic digest-based anti-entropy that pushes what a peer lacks and pulls what
//!   it holds newer
//! - Tombstone purge once every peer has processed an advertisement covering them
//! - Bootstrap of new replicas from the first active peer that answers
//! - Load shedding of anti-entropy while local write activity is high
//! - Listeners isolated from each other's failures
//! - Optional write-through persistence of the entry table to local storage

#![forbid(unsafe_code)]

pub mod accumulator;
pub mod anti_entropy;
mod bootstrap;
pub mod events;
mod handlers;
pub mod load;
pub mod map;
mod persistence;
pub mod prelude;
mod push;
pub mod wire;

pub use accumulator::{Accumulator, AccumulatorConfig, BatchProcessor};
pub use anti_entropy::AntiEntropyOutcome;
pub use events::{ListenerHandle, MapEvent, MapEventType, MapListener};
pub use load::SlidingWindowCounter;
pub use map::{EventuallyConsistentMap, EventuallyConsistentMapBuilder, PeerUpdateFunction};
pub use wire::{AntiEntropyAdvertisement, AntiEntropyResponse, MapSubjects, UpdateEntry, UpdateRequest};
