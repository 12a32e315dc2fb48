//! Per-name cache of primitive instances

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use strand_core::{Result, StrandError};

/// Family a cached primitive belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// [`PartitionedConsistentMap`](crate::PartitionedConsistentMap)
    ConsistentMap,
    /// [`DistributedAtomicCounter`](crate::DistributedAtomicCounter)
    AtomicCounter,
    /// [`DistributedLeaderElector`](crate::DistributedLeaderElector)
    LeaderElector,
}

/// Caches one instance per primitive kind and name
///
/// Instances are created under the cache lock, so concurrent first lookups of a name
/// observe the same instance.
#[derive(Default)]
pub struct PrimitiveCache {
    entries: Mutex<HashMap<(PrimitiveKind, String), Arc<dyn Any + Send + Sync>>>,
}

impl PrimitiveCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached instance of `kind`/`name`, created with `create` on first lookup
    ///
    /// Fails if the name is already cached with a different concrete type.
    pub fn get_or_try_insert<T, F>(&self, kind: PrimitiveKind, name: &str, create: F) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T>,
    {
        let mut entries = self.entries.lock();
        let key = (kind, name.to_string());
        if let Some(existing) = entries.get(&key) {
            return existing.clone().downcast::<T>().map_err(|_| {
                StrandError::invalid(format!(
                    "{kind:?} '{name}' already exists with different key/value types"
                ))
            });
        }

        let instance = Arc::new(create()?);
        entries.insert(key, instance.clone());
        Ok(instance)
    }

    /// Number of cached instances
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_lookup_returns_same_instance() {
        let cache = PrimitiveCache::new();
        let first = cache
            .get_or_try_insert(PrimitiveKind::AtomicCounter, "c", || Ok(5_u32))
            .unwrap();
        let second = cache
            .get_or_try_insert(PrimitiveKind::AtomicCounter, "c", || Ok(9_u32))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second, 5);
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let cache = PrimitiveCache::new();
        cache
            .get_or_try_insert(PrimitiveKind::AtomicCounter, "x", || Ok(1_u32))
            .unwrap();
        cache
            .get_or_try_insert(PrimitiveKind::ConsistentMap, "x", || Ok("map".to_string()))
            .unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let cache = PrimitiveCache::new();
        cache
            .get_or_try_insert(PrimitiveKind::ConsistentMap, "m", || Ok(1_u32))
            .unwrap();
        let err = cache
            .get_or_try_insert(PrimitiveKind::ConsistentMap, "m", || Ok(1_u64))
            .unwrap_err();
        assert!(matches!(err, StrandError::Invalid { .. }));
    }

    #[test]
    fn test_failed_creation_is_not_cached() {
        let cache = PrimitiveCache::new();
        let failed: Result<Arc<u32>> = cache.get_or_try_insert(PrimitiveKind::ConsistentMap, "m", || {
            Err(StrandError::internal("boom"))
        });
        assert!(failed.is_err());
        assert!(cache.is_empty());
    }
}
