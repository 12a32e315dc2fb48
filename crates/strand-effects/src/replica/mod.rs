//! Reference partition replica

pub mod counter;
pub mod elector;
pub mod map;
pub mod partition;

pub use counter::MemoryAtomicCounter;
pub use elector::MemoryLeaderElector;
pub use map::MemoryConsistentMap;
pub use partition::MemoryPartition;
