//! Time source for the control loop and the calibration bootstrap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic microsecond clock with a blocking wait.
///
/// The loop only ever blocks through this trait, which keeps every timing
/// path drivable from tests.
pub trait Clock {
    /// Microseconds since boot.
    fn now_us(&self) -> u64;

    /// Block until `now_us() >= deadline_us`. Returns immediately if already past.
    fn sleep_until(&mut self, deadline_us: u64);

    fn now_ms(&self) -> u64 {
        self.now_us() / 1000
    }

    fn sleep(&mut self, duration: Duration) {
        let deadline = self.now_us().saturating_add(duration.as_micros() as u64);
        self.sleep_until(deadline);
    }
}

/// Wall clock anchored at construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    fn sleep_until(&mut self, deadline_us: u64) {
        let now = self.now_us();
        if deadline_us > now {
            std::thread::sleep(Duration::from_micros(deadline_us - now));
        }
    }
}

/// Deterministic clock for tests and simulations.
///
/// Sleeping jumps time forward to the deadline. Clones share the same time,
/// so a test can keep a handle and [`advance`](ManualClock::advance) it while
/// the loop owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_us: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at_ms(ms: u64) -> Self {
        let clock = Self::new();
        clock.set_us(ms * 1000);
        clock
    }

    pub fn advance(&self, duration: Duration) {
        self.now_us
            .fetch_add(duration.as_micros() as u64, Ordering::SeqCst);
    }

    pub fn set_us(&self, us: u64) {
        self.now_us.store(us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }

    fn sleep_until(&mut self, deadline_us: u64) {
        self.now_us.fetch_max(deadline_us, Ordering::SeqCst);
    }
}
