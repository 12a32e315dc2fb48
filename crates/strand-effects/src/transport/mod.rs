//! Transport handlers

pub mod memory;

pub use memory::{MemoryClusterEndpoint, MemoryClusterNetwork};
