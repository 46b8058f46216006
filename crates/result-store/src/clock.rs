use std::sync::atomic::{AtomicU64, Ordering};

use contextaware_protocol::now_millis;

/// Source of the timestamps stamped onto results and visits.
pub trait Clock: Send + Sync {
    /// Unix milliseconds.
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        now_millis()
    }
}

/// Clock that only moves when told to; every read advances it by `step`.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
    step: u64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self::with_step(start, 0)
    }

    /// Clock whose reads return `start`, `start + step`, `start + 2*step`, ...
    pub fn with_step(start: u64, step: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
            step,
        }
    }

    pub fn set(&self, value: u64) {
        self.now.store(value, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.fetch_add(self.step, Ordering::SeqCst)
    }
}
