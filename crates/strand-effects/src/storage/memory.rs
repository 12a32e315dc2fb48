//! In-memory map storage for testing

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use strand_core::effects::MapStorageEffects;
use strand_core::Result;

/// In-memory map storage
///
/// Clones share the same entries, so a test can hand one clone to a map, destroy the
/// map and rebuild it from another clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryMapStorage {
    entries: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryMapStorage {
    /// Empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl MapStorageEffects for MemoryMapStorage {
    fn load(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn store(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries.lock().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
