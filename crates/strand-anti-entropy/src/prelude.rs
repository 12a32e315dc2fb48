//! Strand anti-entropy prelude.
//!
//! Curated re-exports for building and observing gossip maps.

pub use crate::{
    AntiEntropyOutcome, AntiEntropyResponse, EventuallyConsistentMap,
    EventuallyConsistentMapBuilder, ListenerHandle, MapEvent, MapEventType, MapListener,
};
