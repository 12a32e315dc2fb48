//! System wall clock

use std::time::{SystemTime, UNIX_EPOCH};
use strand_core::effects::PhysicalTimeEffects;

/// Reads the operating system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a system clock handle
    pub fn new() -> Self {
        Self
    }
}

impl PhysicalTimeEffects for SystemClock {
    fn physical_time_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}
