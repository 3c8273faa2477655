//! Error regimes, mirroring the teacher's `CoreError<E>` shape (§7 of the spec).
//!
//! Three regimes: recoverable transient (dropped and logged), application
//! observable (returned as `false`/`0` to the caller), fatal (propagated up
//! to the binary, which exits non-zero). This enum only models the first
//! and carries enough information for callers to implement the second and
//! third themselves.

use std::fmt;

/// Errors produced by the MAC/routing/instrumentation layers.
///
/// Generic over the underlying radio transport's error type, exactly as the
/// teacher's `CoreError<E>` is generic over its radio's error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetError<E> {
    /// A send/receive queue was at capacity and a non-blocking caller backed off.
    QueueFull,
    /// The queue shut down while a caller was blocked on it.
    QueueClosed,
    /// Checksum over header+payload did not match the trailing checksum byte.
    ChecksumMismatch,
    /// First byte of a frame did not match any known control discriminator.
    UnknownControl(u8),
    /// A frame was shorter than its declared length or the minimum header size.
    Truncated,
    /// `maxtrials` was exhausted without an ACK/CTS/wake-ack.
    RetriesExhausted,
    /// Wrapper for the underlying radio transport's errors.
    Radio(E),
    /// A blocking wait exceeded its deadline.
    Timeout,
    /// The MAC/radio state machine could not start the requested operation right now.
    Busy,
}

impl<E: fmt::Debug> fmt::Display for NetError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::QueueFull => write!(f, "queue full"),
            NetError::QueueClosed => write!(f, "queue closed"),
            NetError::ChecksumMismatch => write!(f, "checksum mismatch"),
            NetError::UnknownControl(c) => write!(f, "unknown control byte 0x{:02x}", c),
            NetError::Truncated => write!(f, "frame truncated"),
            NetError::RetriesExhausted => write!(f, "retries exhausted"),
            NetError::Radio(e) => write!(f, "radio error: {:?}", e),
            NetError::Timeout => write!(f, "timed out"),
            NetError::Busy => write!(f, "busy"),
        }
    }
}

impl<E: fmt::Debug> std::error::Error for NetError<E> {}

pub type Result<T, E> = std::result::Result<T, NetError<E>>;
