//! Network Allocation Vector (§3, §4.3 MACAW/STEM variants).
//!
//! A single monotonic deadline: senders defer until `now > NAV`. Observing a
//! control frame that announces a reservation (RTS/CTS/data) pushes the
//! deadline forward to cover the estimated remaining transmission.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::timer::Millis;

pub struct Nav {
    deadline_ms: AtomicU64,
}

impl Nav {
    pub fn new() -> Self {
        Self { deadline_ms: AtomicU64::new(0) }
    }

    /// Push the deadline forward to `now + duration`, never backward.
    pub fn set_at_least(&self, now: Millis, duration_ms: u64) {
        let candidate = now + duration_ms;
        self.deadline_ms.fetch_max(candidate, Ordering::SeqCst);
    }

    pub fn deadline(&self) -> Millis {
        self.deadline_ms.load(Ordering::SeqCst)
    }

    pub fn is_clear(&self, now: Millis) -> bool {
        now > self.deadline_ms.load(Ordering::SeqCst)
    }
}

impl Default for Nav {
    fn default() -> Self {
        Self::new()
    }
}

/// Estimated on-air duration of `num_bytes` plus a fixed per-frame
/// overhead, used to compute NAV durations for overheard RTS/CTS/data.
/// `t_offset_ms` and `t_per_byte_ms` are configured per radio/bitrate
/// (§4.3: "duration(CTS + data + ACK) computed as t_offset + bytes * t_per_byte").
pub fn duration_ms(t_offset_ms: u64, t_per_byte_ms: u64, num_bytes: usize) -> u64 {
    t_offset_ms + t_per_byte_ms * num_bytes as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nav_only_moves_forward() {
        let nav = Nav::new();
        nav.set_at_least(0, 100);
        assert_eq!(nav.deadline(), 100);
        nav.set_at_least(50, 20);
        assert_eq!(nav.deadline(), 100);
        nav.set_at_least(50, 200);
        assert_eq!(nav.deadline(), 250);
    }

    #[test]
    fn is_clear_once_now_exceeds_deadline() {
        let nav = Nav::new();
        nav.set_at_least(0, 100);
        assert!(!nav.is_clear(100));
        assert!(nav.is_clear(101));
    }
}
