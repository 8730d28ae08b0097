//! Producer back-off policies
//!
//! When a producer finds the ring full it must wait for the slowest consumer.
//! How it waits is a tuning decision independent of the claim algorithm, so
//! the sequencers take the policy as an injectable trait object.

use std::fmt::Debug;
use std::hint;
use std::thread;
use std::time::Duration;

/// Policy applied between capacity re-checks of a blocking claim
pub trait Backoff: Send + Sync + Debug {
    /// Pause before the next re-check
    ///
    /// `attempt` counts failed checks within the current claim, starting at 0.
    fn back_off(&self, attempt: u32);
}

/// Park the thread for a fixed, tiny duration on every attempt
#[derive(Debug, Clone, Copy)]
pub struct ParkBackoff {
    park: Duration,
}

impl ParkBackoff {
    pub fn new(park: Duration) -> Self {
        Self { park }
    }
}

impl Default for ParkBackoff {
    fn default() -> Self {
        Self::new(Duration::from_nanos(1))
    }
}

impl Backoff for ParkBackoff {
    #[inline]
    fn back_off(&self, _attempt: u32) {
        thread::park_timeout(self.park);
    }
}

/// Spin, then yield, then park
///
/// The first `spin_tries` attempts issue a spin-loop hint, the next
/// `yield_tries` yield the OS thread, and every attempt after that parks for
/// `park`.
#[derive(Debug, Clone, Copy)]
pub struct SpinYieldParkBackoff {
    spin_tries: u32,
    yield_tries: u32,
    park: Duration,
}

impl SpinYieldParkBackoff {
    pub fn new(spin_tries: u32, yield_tries: u32, park: Duration) -> Self {
        Self {
            spin_tries,
            yield_tries,
            park,
        }
    }
}

impl Default for SpinYieldParkBackoff {
    fn default() -> Self {
        Self::new(100, 100, Duration::from_micros(1))
    }
}

impl Backoff for SpinYieldParkBackoff {
    #[inline]
    fn back_off(&self, attempt: u32) {
        if attempt < self.spin_tries {
            hint::spin_loop();
        } else if attempt < self.spin_tries.saturating_add(self.yield_tries) {
            thread::yield_now();
        } else {
            thread::park_timeout(self.park);
        }
    }
}
