//! Monotonic time source used by every thread that waits on a deadline.
//!
//! All methods are monotonic and relative to the same unknown epoch, so the
//! MAC and routing layers can compute NAV deadlines, ACK timeouts and
//! cleanup intervals without caring whether they're backed by a real clock
//! or a test double.

use std::time::{Duration, Instant};

/// Absolute point in time, expressed in milliseconds since the `Timer`'s epoch.
pub type Millis = u64;

pub trait Timer: Clone + Send + Sync + 'static {
    /// Milliseconds elapsed since some unknown epoch.
    fn now_ms(&self) -> Millis;

    /// Block the calling thread for roughly the given duration.
    fn sleep(&self, d: Duration);

    fn deadline_in(&self, d: Duration) -> Millis {
        self.now_ms() + d.as_millis() as u64
    }

    fn has_passed(&self, deadline: Millis) -> bool {
        self.now_ms() >= deadline
    }
}

/// Wall-clock timer backed by `std::time::Instant`.
#[derive(Clone)]
pub struct SystemTimer {
    start: Instant,
}

impl SystemTimer {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for SystemTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for SystemTimer {
    fn now_ms(&self) -> Millis {
        self.start.elapsed().as_millis() as u64
    }

    fn sleep(&self, d: Duration) {
        std::thread::sleep(d)
    }
}

/// Deterministic fake clock for timing-sensitive tests (teacher's
/// `timer::mock::MockTimer`, generalised from a frozen tick count to an
/// advanceable one: this crate's ACK/NAV/wake-beacon timeouts need to
/// observe time actually moving forward, not just read a fixed instant).
/// `sleep` advances the clock instead of blocking the calling thread, so a
/// worker loop that paces itself with repeated `timer.sleep(..)` calls runs
/// to completion at test speed instead of real wall-clock speed — useful
/// for single-actor timeout tests (e.g. "give up after the burst window"),
/// but unsuitable for tests where two independent actors on separate OS
/// threads must rendezvous in real time (each owns its own clock state).
#[cfg(test)]
pub mod mock {
    use super::{Millis, Timer};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone)]
    pub struct MockTimer {
        now_ms: Arc<Mutex<Millis>>,
    }

    impl MockTimer {
        pub fn new() -> Self {
            Self { now_ms: Arc::new(Mutex::new(0)) }
        }

        /// Move the clock forward by `d` without blocking.
        pub fn advance(&self, d: Duration) {
            *self.now_ms.lock().unwrap() += d.as_millis() as u64;
        }
    }

    impl Default for MockTimer {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Timer for MockTimer {
        fn now_ms(&self) -> Millis {
            *self.now_ms.lock().unwrap()
        }

        fn sleep(&self, d: Duration) {
            self.advance(d);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn advances_only_on_sleep() {
            let t = MockTimer::new();
            assert_eq!(t.now_ms(), 0);
            t.sleep(Duration::from_millis(40));
            assert_eq!(t.now_ms(), 40);
        }

        #[test]
        fn clones_share_the_same_clock() {
            let t = MockTimer::new();
            let clone = t.clone();
            t.sleep(Duration::from_millis(10));
            assert_eq!(clone.now_ms(), 10);
        }
    }
}
