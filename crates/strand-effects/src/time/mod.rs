//! Clock handlers and write timestamp providers

pub mod real;
pub mod simulated;
pub mod timestamps;

pub use real::SystemClock;
pub use simulated::SimulatedClock;
pub use timestamps::{LogicalClock, WallClockTimestamps};
