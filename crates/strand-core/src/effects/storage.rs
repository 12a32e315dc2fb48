//! Local storage backing persistent gossip maps

use crate::errors::Result;

/// Byte-level key/value store owned by a single map replica
///
/// A persistent gossip map writes every change of its entry table through this store
/// and reloads the table from it when rebuilt. Keys and values arrive already encoded;
/// the store never interprets them. Calls happen while the map holds its entry lock, so
/// implementations should not block for long.
pub trait MapStorageEffects: Send + Sync {
    /// Every stored entry, in no particular order
    fn load(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Insert or overwrite the entry for `key`
    fn store(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete the entry for `key`; deleting a missing key succeeds
    fn delete(&self, key: &[u8]) -> Result<()>;
}
