//! Local storage handlers for persistent gossip maps

pub mod filesystem;
pub mod memory;

pub use filesystem::FilesystemMapStorage;
pub use memory::MemoryMapStorage;
