//! Simulated wall clock for tests and simulation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strand_core::effects::PhysicalTimeEffects;

/// Manually advanced wall clock shared by every clone
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock {
    /// Current simulated time in milliseconds
    current_ms: Arc<AtomicU64>,
}

impl SimulatedClock {
    /// Create a simulated clock starting at `start_ms`
    pub fn new(start_ms: u64) -> Self {
        Self {
            current_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Advance the clock by `ms`
    pub fn advance(&self, ms: u64) {
        self.current_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set the absolute time
    pub fn set(&self, ms: u64) {
        self.current_ms.store(ms, Ordering::SeqCst);
    }

    /// Current time in milliseconds
    pub fn now(&self) -> u64 {
        self.current_ms.load(Ordering::SeqCst)
    }
}

impl PhysicalTimeEffects for SimulatedClock {
    fn physical_time_ms(&self) -> u64 {
        self.now()
    }
}
