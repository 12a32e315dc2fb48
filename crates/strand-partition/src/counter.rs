//! Atomic counter pinned to the partition its name hashes to

use std::sync::Arc;
use strand_core::effects::AtomicCounterEffects;
use strand_core::{PartitionId, Result};

/// A named counter living on exactly one partition for its whole lifetime
#[derive(Clone)]
pub struct DistributedAtomicCounter {
    name: String,
    partition: PartitionId,
    inner: Arc<dyn AtomicCounterEffects>,
}

impl DistributedAtomicCounter {
    pub(crate) fn new(
        name: impl Into<String>,
        partition: PartitionId,
        inner: Arc<dyn AtomicCounterEffects>,
    ) -> Self {
        Self {
            name: name.into(),
            partition,
            inner,
        }
    }

    /// Counter name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Partition hosting the counter
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Current value
    pub async fn get(&self) -> Result<i64> {
        self.inner.get().await
    }

    /// Overwrite the value
    pub async fn set(&self, value: i64) -> Result<()> {
        self.inner.set(value).await
    }

    /// Add `delta` and return the new value
    pub async fn add_and_get(&self, delta: i64) -> Result<i64> {
        self.inner.add_and_get(delta).await
    }

    /// Add `delta` and return the previous value
    pub async fn get_and_add(&self, delta: i64) -> Result<i64> {
        self.inner.get_and_add(delta).await
    }

    /// Increment and return the new value
    pub async fn increment_and_get(&self) -> Result<i64> {
        self.inner.increment_and_get().await
    }

    /// Increment and return the previous value
    pub async fn get_and_increment(&self) -> Result<i64> {
        self.inner.get_and_increment().await
    }

    /// Set to `update` only while the counter equals `expect`
    pub async fn compare_and_set(&self, expect: i64, update: i64) -> Result<bool> {
        self.inner.compare_and_set(expect, update).await
    }
}

impl std::fmt::Debug for DistributedAtomicCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedAtomicCounter")
            .field("name", &self.name)
            .field("partition", &self.partition)
            .finish_non_exhaustive()
    }
}
