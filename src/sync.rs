//! Counting semaphore, the host-OS substitute for the C testbed's `sem_t`.
//!
//! Every queue in the original source (`sendMsgQueue`, `recvMsgQueue`,
//! `PacketQueue`, `TableQueue`, ...) is a ring buffer guarded by three
//! semaphores: `free`, `full` and a binary `mutex`. Rust's standard library
//! has no counting semaphore, so this is built directly on `Mutex<usize>` +
//! `Condvar`, mirroring `sem_init`/`sem_wait`/`sem_trywait`/`sem_timedwait`/
//! `sem_post` one for one.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Outcome of a timed wait (§4.1): either a permit was acquired before the
/// deadline, or it wasn't.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Acquired,
    TimedOut,
}

pub struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Self { count: Mutex::new(initial), cond: Condvar::new() }
    }

    /// `sem_wait`: block until a permit is available.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cond.wait(count).unwrap();
        }
        *count -= 1;
    }

    /// `sem_trywait`: acquire without blocking.
    pub fn try_wait(&self) -> bool {
        let mut count = self.count.lock().unwrap();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// `sem_timedwait`: block until a permit is available or `deadline` passes.
    pub fn timed_wait(&self, deadline: Instant) -> WaitOutcome {
        let mut count = self.count.lock().unwrap();
        loop {
            if *count > 0 {
                *count -= 1;
                return WaitOutcome::Acquired;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            let (guard, result) = self.cond.wait_timeout(count, deadline - now).unwrap();
            count = guard;
            if result.timed_out() && *count == 0 {
                return WaitOutcome::TimedOut;
            }
        }
    }

    /// `sem_post`: release a permit, waking one waiter.
    pub fn post(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cond.notify_one();
    }

    pub fn available(&self) -> usize {
        *self.count.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn try_wait_respects_count() {
        let sem = Semaphore::new(1);
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
        sem.post();
        assert!(sem.try_wait());
    }

    #[test]
    fn timed_wait_times_out() {
        let sem = Semaphore::new(0);
        let outcome = sem.timed_wait(Instant::now() + Duration::from_millis(20));
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[test]
    fn post_wakes_blocked_waiter() {
        let sem = Arc::new(Semaphore::new(0));
        let other = sem.clone();
        let handle = thread::spawn(move || {
            other.wait();
        });
        thread::sleep(Duration::from_millis(10));
        sem.post();
        handle.join().unwrap();
    }
}
