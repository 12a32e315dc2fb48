//! In-memory atomic counter

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use strand_core::effects::AtomicCounterEffects;
use strand_core::Result;

/// Counter hosted by a [`MemoryPartition`](super::MemoryPartition)
#[derive(Debug, Default)]
pub struct MemoryAtomicCounter {
    value: AtomicI64,
}

impl MemoryAtomicCounter {
    /// Create a counter at zero
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AtomicCounterEffects for MemoryAtomicCounter {
    async fn get(&self) -> Result<i64> {
        Ok(self.value.load(Ordering::SeqCst))
    }

    async fn set(&self, value: i64) -> Result<()> {
        self.value.store(value, Ordering::SeqCst);
        Ok(())
    }

    async fn add_and_get(&self, delta: i64) -> Result<i64> {
        Ok(self.value.fetch_add(delta, Ordering::SeqCst) + delta)
    }

    async fn get_and_add(&self, delta: i64) -> Result<i64> {
        Ok(self.value.fetch_add(delta, Ordering::SeqCst))
    }

    async fn compare_and_set(&self, expect: i64, update: i64) -> Result<bool> {
        Ok(self
            .value
            .compare_exchange(expect, update, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok())
    }
}
