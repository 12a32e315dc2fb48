//! Write-through persistence of a map's entry table
//!
//! Entries and tombstones are stored under their bincode-encoded key. Storage failures
//! never fail a map operation: the in-memory table stays authoritative and anti-entropy
//! repairs whatever a later restore misses.

use std::collections::HashMap;
use std::sync::Arc;
use strand_core::effects::MapStorageEffects;
use strand_core::serialization::{decode, encode};
use strand_core::{MapValue, Result, StoreKey, StoreValue};
use tracing::{debug, warn};

pub(crate) struct PersistentItems {
    map: String,
    store: Arc<dyn MapStorageEffects>,
}

impl PersistentItems {
    pub(crate) fn new(map: impl Into<String>, store: Arc<dyn MapStorageEffects>) -> Self {
        Self {
            map: map.into(),
            store,
        }
    }

    /// Entry table left by a previous replica of the map
    pub(crate) fn restore<K: StoreKey, V: StoreValue>(&self) -> Result<HashMap<K, MapValue<V>>> {
        let mut items = HashMap::new();
        for (key, value) in self.store.load()? {
            match (decode::<K>(&key), decode::<MapValue<V>>(&value)) {
                (Ok(key), Ok(value)) => {
                    items.insert(key, value);
                }
                (Err(err), _) | (_, Err(err)) => {
                    warn!(map = %self.map, error = %err, "Skipping undecodable persisted entry");
                }
            }
        }
        debug!(map = %self.map, entries = items.len(), "Restored persisted entries");
        Ok(items)
    }

    pub(crate) fn write<K: StoreKey, V: StoreValue>(&self, key: &K, value: &MapValue<V>) {
        let stored = encode(key).and_then(|key| {
            let value = encode(value)?;
            self.store.store(&key, &value)
        });
        if let Err(err) = stored {
            warn!(map = %self.map, ?key, error = %err, "Failed to persist entry");
        }
    }

    pub(crate) fn erase<K: StoreKey>(&self, key: &K) {
        if let Err(err) = encode(key).and_then(|key| self.store.delete(&key)) {
            warn!(map = %self.map, ?key, error = %err, "Failed to delete persisted entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::Timestamp;
    use strand_effects::MemoryMapStorage;

    #[test]
    fn test_restore_skips_undecodable_entries() {
        let storage = MemoryMapStorage::new();
        let items = PersistentItems::new("m", Arc::new(storage.clone()));
        items.write(&"live".to_string(), &MapValue::new(7_u32, Timestamp::logical(1), 10));
        items.write(&"gone".to_string(), &MapValue::<u32>::tombstone(Timestamp::logical(2), 11));
        storage.store(b"\xff", b"\xff").unwrap();

        let restored = items.restore::<String, u32>().unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored["live"].get(), Some(&7));
        assert!(restored["gone"].is_tombstone());

        items.erase(&"gone".to_string());
        assert_eq!(storage.len(), 2);
    }
}
