//! C3 — MAC engine: shared send/receive contract over three framing
//! variants (ALOHA, MACAW, STEM). Generalised from the teacher's
//! `Core<R, T, B, M>` (`mac/core.rs`) — same idea (one engine generic over
//! radio/timer, specialised per variant) widened from an IEEE 802.15.4 CSMA
//! poller to the blocking-thread, byte-stream MAC this spec describes.

pub mod aloha;
pub mod macaw;
pub mod nav;
pub mod stem;

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::neighbor::BROADCAST_ADDR;
use crate::timer::Millis;

/// Shared configuration across all three variants (§4.3 defaults).
#[derive(Debug, Clone, PartialEq)]
pub struct MacConfig {
    pub max_retries: u16,
    pub ack_timeout_range: (Duration, Duration),
    pub noise_threshold_dbm: i8,
    pub channel_clear_threshold_dbm: i8,
    pub sample_noise: bool,
    pub timeslot: Duration,
    /// RTS/CTS reservation timeout (MACAW `AWAIT_CTS`).
    pub reservation_timeout: Duration,
    /// Fixed per-frame overhead used for NAV duration estimates.
    pub nav_t_offset_ms: u64,
    pub nav_t_per_byte_ms: u64,
    /// STEM wake-beacon repeat interval and burst length.
    pub wake_beacon_interval: Duration,
    pub wake_beacon_burst: Duration,
    /// STEM duty cycle: sleep then listen.
    pub sleep_duration: Duration,
    pub wake_duration: Duration,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            ack_timeout_range: (Duration::from_secs(5), Duration::from_secs(10)),
            noise_threshold_dbm: -95,
            channel_clear_threshold_dbm: -90,
            sample_noise: false,
            timeslot: Duration::from_millis(20),
            reservation_timeout: Duration::from_secs(2),
            nav_t_offset_ms: 10,
            nav_t_per_byte_ms: 1,
            wake_beacon_interval: Duration::from_millis(100),
            wake_beacon_burst: Duration::from_secs(2),
            sleep_duration: Duration::from_millis(500),
            wake_duration: Duration::from_millis(50),
        }
    }
}

/// Populated on every successful receive (§6): `{src, dst, prev_hop, rssi,
/// hop_count}` in spec terms — here the MAC-level subset (`src`, `dst`,
/// `seq`, `len`, `rssi`); routing adds `prev_hop`/`hop_count`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecvHeader {
    pub src: u8,
    pub dst: u8,
    pub seq: u16,
    pub len: u16,
    pub rssi: i8,
}

/// Per-destination send counters and per-source expected-receive counters
/// (§3 "Sequence numbers"), one 16-bit slot per address, each array
/// accessed only from its own thread per §5's shared-resource policy — no
/// lock needed beyond what protects concurrent `send`/`isend` callers.
pub struct SeqTables {
    send: Mutex<Vec<u16>>,
    expected_recv: Mutex<Vec<u16>>,
}

impl SeqTables {
    pub fn new() -> Self {
        Self { send: Mutex::new(vec![0u16; 256]), expected_recv: Mutex::new(vec![0u16; 256]) }
    }

    /// Advance and return the sequence number to use for the next frame to
    /// `dest`. Advances regardless of the eventual outcome (§4.3 step 4).
    pub fn next_send_seq(&self, dest: u8) -> u16 {
        let mut table = self.send.lock().unwrap();
        let seq = table[dest as usize];
        table[dest as usize] = seq.wrapping_add(1);
        seq
    }

    /// `true` if `seq` from `src` is a duplicate retransmission (§4.3):
    /// `seq <= expected[src] && seq != 0`. Broadcasts never call this.
    pub fn is_duplicate(&self, src: u8, seq: u16) -> bool {
        let table = self.expected_recv.lock().unwrap();
        seq != 0 && seq <= table[src as usize]
    }

    pub fn record_recv_seq(&self, src: u8, seq: u16) {
        let mut table = self.expected_recv.lock().unwrap();
        table[src as usize] = seq;
    }
}

impl Default for SeqTables {
    fn default() -> Self {
        Self::new()
    }
}

pub fn is_broadcast(addr: u8) -> bool {
    addr == BROADCAST_ADDR
}

/// Absolute deadline `d` milliseconds out, for use with [`crate::queue::BoundedQueue::timed_dequeue`].
pub fn deadline_after(now_instant: Instant, d: Duration) -> Instant {
    now_instant + d
}

/// Shared send/receive contract implemented by all three MAC variants
/// (§4.3 "share a common send/receive contract"; §6 application API
/// applies one layer up at the routing boundary, but the MAC's own surface
/// mirrors it one-for-one).
pub trait Mac: Send + Sync + 'static {
    /// Blocking send: copies `data`, waits for the attempt to terminate
    /// (success or retries exhausted), returns success.
    fn send(&self, dest: u8, data: &[u8]) -> bool;

    /// Non-blocking send: enqueues and returns immediately; `false` if the
    /// send queue is full (the buffer is not retained on failure).
    fn isend(&self, dest: u8, data: &[u8]) -> bool;

    /// Blocking receive. Returns the payload length (0 only if the MAC is
    /// shutting down).
    fn recv(&self, header: &mut RecvHeader, data: &mut [u8]) -> usize;

    /// Non-blocking receive. Returns 0 immediately if nothing is queued.
    fn try_recv(&self, header: &mut RecvHeader, data: &mut [u8]) -> usize;

    /// Receive with a relative timeout. Returns 0 on timeout.
    fn timed_recv(&self, header: &mut RecvHeader, data: &mut [u8], timeout: Duration) -> usize;
}

pub(crate) fn now_ms(timer: &impl crate::timer::Timer) -> Millis {
    timer.now_ms()
}

/// Matches an incoming control frame (ACK/CTS/wake-ack) against whatever the
/// send worker is currently waiting for. One instance per control-frame
/// kind a variant waits on; the receive worker calls `notify` whenever it
/// parses that kind, and the send worker blocks in `wait_match` with a
/// deadline. Grounded in `ALOHA.c`'s `sem_ack`/global `ack` pair, widened
/// from a single pending slot to hold the frame until a matching waiter
/// consumes it (so a CTS destined for someone else doesn't fall on the floor
/// before MACAW's NAV update sees it).
pub struct ControlWaiter<T> {
    slot: Mutex<Option<T>>,
    cond: std::sync::Condvar,
}

impl<T: Clone> ControlWaiter<T> {
    pub fn new() -> Self {
        Self { slot: Mutex::new(None), cond: std::sync::Condvar::new() }
    }

    /// Record the most recently observed frame of this kind and wake any waiter.
    pub fn notify(&self, value: T) {
        let mut slot = self.slot.lock().unwrap();
        *slot = Some(value);
        self.cond.notify_all();
    }

    /// Block until a notified value satisfies `matches`, or `deadline` passes.
    pub fn wait_match(&self, deadline: Instant, matches: impl Fn(&T) -> bool) -> Option<T> {
        let mut slot = self.slot.lock().unwrap();
        loop {
            if let Some(value) = slot.as_ref() {
                if matches(value) {
                    return slot.take();
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, result) = self.cond.wait_timeout(slot, deadline - now).unwrap();
            slot = guard;
            if result.timed_out() {
                if let Some(value) = slot.as_ref() {
                    if matches(value) {
                        return slot.take();
                    }
                }
                return None;
            }
        }
    }
}

impl<T: Clone> Default for ControlWaiter<T> {
    fn default() -> Self {
        Self::new()
    }
}

