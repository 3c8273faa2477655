//! C1 — bounded message queues.
//!
//! A fixed-capacity circular buffer with three counting semaphores exactly
//! as spec.md §4.1 describes and `ALOHA.c`'s `sendMsgQueue`/`recvMsgQueue`
//! and `STRP.c`'s `PacketQueue`/`TableQueue` implement: `free` starts at
//! capacity, `full` starts at zero, and a mutex (here, the `Mutex` guarding
//! the backing `VecDeque` itself, rather than a fourth semaphore — `std::
//! sync::Mutex` already gives the same short-critical-section guarantee a
//! binary semaphore would).
//!
//! Blocking enqueue/dequeue never livelock: a consumer blocked on `full` is
//! woken by the next producer's `full.post()`, and a producer blocked on
//! `free` is woken by the next consumer's `free.post()`.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::sync::{Semaphore, WaitOutcome};

/// Result of a timed or non-blocking dequeue: distinguishes "nothing
/// arrived in time" from "a slot was available".
#[derive(Debug)]
pub enum DequeueOutcome<T> {
    Item(T),
    TimedOut,
}

pub struct BoundedQueue<T> {
    slots: Mutex<VecDeque<T>>,
    free: Semaphore,
    full: Semaphore,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(VecDeque::with_capacity(capacity)),
            free: Semaphore::new(capacity),
            full: Semaphore::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.full.available()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocking enqueue: waits for a free slot.
    pub fn enqueue(&self, item: T) {
        self.free.wait();
        self.slots.lock().unwrap().push_back(item);
        self.full.post();
    }

    /// Non-blocking enqueue. Returns the item back to the caller (so it can
    /// release any resources it owns) when the queue is full, mirroring
    /// §4.1's "a try-enqueue failure must release any payload the producer
    /// had allocated".
    pub fn try_enqueue(&self, item: T) -> Result<(), T> {
        if !self.free.try_wait() {
            return Err(item);
        }
        self.slots.lock().unwrap().push_back(item);
        self.full.post();
        Ok(())
    }

    /// Blocking dequeue: waits for an item.
    pub fn dequeue(&self) -> T {
        self.full.wait();
        let item = self.slots.lock().unwrap().pop_front().expect("full semaphore desynced from storage");
        self.free.post();
        item
    }

    /// Non-blocking dequeue.
    pub fn try_dequeue(&self) -> Option<T> {
        if !self.full.try_wait() {
            return None;
        }
        let item = self.slots.lock().unwrap().pop_front().expect("full semaphore desynced from storage");
        self.free.post();
        Some(item)
    }

    /// Dequeue with an absolute deadline. Leaves head/tail unchanged on timeout.
    pub fn timed_dequeue(&self, deadline: Instant) -> DequeueOutcome<T> {
        match self.full.timed_wait(deadline) {
            WaitOutcome::Acquired => {
                let item = self.slots.lock().unwrap().pop_front().expect("full semaphore desynced from storage");
                self.free.post();
                DequeueOutcome::Item(item)
            }
            _ => DequeueOutcome::TimedOut,
        }
    }

    /// Dequeue with a relative timeout, for callers working in durations
    /// rather than absolute instants (e.g. `routing_timed_recv(timeout_s)`).
    pub fn timed_dequeue_for(&self, timeout: Duration) -> DequeueOutcome<T> {
        self.timed_dequeue(Instant::now() + timeout)
    }
}
