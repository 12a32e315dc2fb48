//! Sliding-window write counter used for load shedding

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct Window {
    counts: Vec<u64>,
    /// Absolute index of the current slot since `origin`
    head: u64,
}

/// Event counter over a fixed number of equal time slots
///
/// Slots rotate lazily: each access first clears the slots that elapsed since the
/// previous access.
pub struct SlidingWindowCounter {
    slot_width: Duration,
    origin: Instant,
    window: Mutex<Window>,
}

impl SlidingWindowCounter {
    /// Counter over `slots` one-second slots
    pub fn new(slots: usize) -> Self {
        Self::with_slot_width(slots, Duration::from_secs(1))
    }

    /// Counter over `slots` slots of `slot_width` each
    pub fn with_slot_width(slots: usize, slot_width: Duration) -> Self {
        Self {
            slot_width,
            origin: Instant::now(),
            window: Mutex::new(Window {
                counts: vec![0; slots.max(1)],
                head: 0,
            }),
        }
    }

    /// Record one event in the current slot
    pub fn increment(&self) {
        let mut window = self.window.lock();
        self.advance(&mut window);
        let len = window.counts.len() as u64;
        let slot = (window.head % len) as usize;
        window.counts[slot] += 1;
    }

    /// Events recorded in the most recent `slots` slots, the current one included
    pub fn get(&self, slots: usize) -> u64 {
        let mut window = self.window.lock();
        self.advance(&mut window);
        let len = window.counts.len() as u64;
        let slots = (slots as u64).min(len);
        (0..slots)
            .map(|back| {
                let slot = (window.head + len - back) % len;
                window.counts[slot as usize]
            })
            .sum()
    }

    fn advance(&self, window: &mut Window) {
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        let width = self.slot_width.as_nanos().max(1);
        let current = u64::try_from(elapsed.as_nanos() / width).unwrap_or(u64::MAX);
        if current <= window.head {
            return;
        }
        let len = window.counts.len() as u64;
        if current - window.head >= len {
            window.counts.iter_mut().for_each(|count| *count = 0);
        } else {
            for slot in (window.head + 1)..=current {
                window.counts[(slot % len) as usize] = 0;
            }
        }
        window.head = current;
    }
}
