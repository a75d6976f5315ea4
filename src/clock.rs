//! Monotonic + wall clock abstraction.
//!
//! The supervisor loop times every decision (heartbeat timeouts, the reboot
//! scheduler, persistence cadence) off a monotonic second counter, never off
//! wall-clock time, since a stepped or adjusted system clock must never
//! mask or fake a timeout. Wall-clock is only used for display timestamps
//! in the human statistics log and for the daily reboot-policy hour/minute
//! check. Abstracted behind a trait so tests can drive time deterministically
//! instead of sleeping.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub trait Clock: Send + Sync {
    /// Monotonic seconds since an arbitrary fixed point (clock construction).
    fn monotonic_secs(&self) -> u64;
    /// Unix epoch seconds, wall-clock. Never used for timing decisions.
    fn wall_secs(&self) -> u64;
}

/// Real clock backed by `Instant` (monotonic) and `SystemTime` (wall).
pub struct SystemClock {
    start: Instant,
    wall_offset: AtomicU64,
}

impl SystemClock {
    pub fn new() -> Self {
        let wall_now = chrono::Utc::now().timestamp();
        Self {
            start: Instant::now(),
            wall_offset: AtomicU64::new(wall_now.max(0) as u64),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    fn wall_secs(&self) -> u64 {
        // wall_offset was sampled at the same instant as `start`, so
        // wall_secs() tracks real time by re-adding elapsed monotonic time.
        self.wall_offset.load(Ordering::Relaxed) + self.start.elapsed().as_secs()
    }
}

/// Test clock: monotonic and wall time both advance only when told to.
pub struct FakeClock {
    monotonic: Cell<u64>,
    wall: Cell<u64>,
}

// Tests are single-threaded; Cell is fine and avoids lock overhead.
unsafe impl Sync for FakeClock {}

impl FakeClock {
    pub fn new(wall_start: u64) -> Self {
        Self {
            monotonic: Cell::new(0),
            wall: Cell::new(wall_start),
        }
    }

    pub fn advance(&self, secs: u64) {
        self.monotonic.set(self.monotonic.get() + secs);
        self.wall.set(self.wall.get() + secs);
    }

    pub fn set_monotonic(&self, secs: u64) {
        self.monotonic.set(secs);
    }
}

impl Clock for FakeClock {
    fn monotonic_secs(&self) -> u64 {
        self.monotonic.get()
    }

    fn wall_secs(&self) -> u64 {
        self.wall.get()
    }
}
