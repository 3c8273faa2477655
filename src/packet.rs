//! Manual byte-exact wire framing for the MAC and routing layers (§3, §4.3).
//!
//! Every layout here is little-endian and field-by-field, matching the C
//! structs in `original_source` one for one — no reliance on host struct
//! layout, following the teacher's own `packet.rs::Packet::encode/decode`
//! style (explicit cursor, no derive macro).

use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use crate::error::NetError;

pub const MAX_PAYLOAD_LEN: usize = 240;

/// MAC-level control byte: discriminates what kind of frame follows the
/// first byte on the wire. `Data` carries a routing frame as its payload;
/// the rest are fixed-size control frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MacControl {
    Data = 0x01,
    Ack = 0x02,
    Rts = 0x03,
    Cts = 0x04,
    WakeBeacon = 0x05,
    WakeAck = 0x06,
}

impl MacControl {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(MacControl::Data),
            0x02 => Some(MacControl::Ack),
            0x03 => Some(MacControl::Rts),
            0x04 => Some(MacControl::Cts),
            0x05 => Some(MacControl::WakeBeacon),
            0x06 => Some(MacControl::WakeAck),
            _ => None,
        }
    }
}

/// MAC data-frame header (8 bytes, §3): `ctrl, src, dst, seq, len, checksum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacHeader {
    pub src: u8,
    pub dst: u8,
    pub seq: u16,
    pub len: u16,
}

pub const MAC_HEADER_LEN: usize = 8;

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

impl MacHeader {
    /// Encode a data frame (header + payload) into `buf`, returning the
    /// total length written. `buf` should be at least
    /// `MAX_MAC_FRAME_LEN` bytes (the true worst case, §1/§4.5); if `buf` is
    /// too small to hold `payload` the payload is truncated to fit rather
    /// than panicking, and a warning is logged.
    pub fn encode_data(src: u8, dst: u8, seq: u16, payload: &[u8], buf: &mut [u8]) -> usize {
        let max_payload = buf.len().saturating_sub(MAC_HEADER_LEN);
        let payload = if payload.len() > max_payload {
            warn!("MAC data frame payload ({} bytes) truncated to fit {}-byte buffer", payload.len(), buf.len());
            &payload[..max_payload]
        } else {
            payload
        };
        buf[0] = MacControl::Data as u8;
        buf[1] = src;
        buf[2] = dst;
        LittleEndian::write_u16(&mut buf[3..5], seq);
        LittleEndian::write_u16(&mut buf[5..7], payload.len() as u16);
        buf[MAC_HEADER_LEN..MAC_HEADER_LEN + payload.len()].copy_from_slice(payload);
        // checksum covers header[..7] (everything but the checksum byte
        // itself) concatenated with the payload.
        let sum = checksum(&buf[0..7]).wrapping_add(checksum(payload));
        buf[7] = sum;
        MAC_HEADER_LEN + payload.len()
    }
}

/// A frame as decoded off the wire: either a data frame (header + payload
/// slice) or one of the fixed-size control frames.
#[derive(Debug)]
pub enum DecodedFrame<'a> {
    Data { header: MacHeader, payload: &'a [u8] },
    Ack(AckFrame),
    Rts(RtsFrame),
    Cts(CtsFrame),
    WakeBeacon(WakeFrame),
    WakeAck(WakeFrame),
}

/// Decode whatever frame type `buf` holds. `E` only appears in the returned
/// error type so callers can unify with their own radio error.
pub fn decode<E>(buf: &[u8]) -> Result<DecodedFrame<'_>, NetError<E>> {
    if buf.is_empty() {
        return Err(NetError::Truncated);
    }
    let ctrl = MacControl::from_byte(buf[0]).ok_or(NetError::UnknownControl(buf[0]))?;
    match ctrl {
        MacControl::Data => {
            if buf.len() < MAC_HEADER_LEN {
                return Err(NetError::Truncated);
            }
            let src = buf[1];
            let dst = buf[2];
            let seq = LittleEndian::read_u16(&buf[3..5]);
            let len = LittleEndian::read_u16(&buf[5..7]);
            let checksum_byte = buf[7];
            let payload_end = MAC_HEADER_LEN + len as usize;
            if buf.len() < payload_end {
                return Err(NetError::Truncated);
            }
            let payload = &buf[MAC_HEADER_LEN..payload_end];
            let expected = checksum(&buf[0..7]).wrapping_add(checksum(payload));
            if expected != checksum_byte {
                return Err(NetError::ChecksumMismatch);
            }
            Ok(DecodedFrame::Data { header: MacHeader { src, dst, seq, len }, payload })
        }
        MacControl::Ack => Ok(DecodedFrame::Ack(AckFrame::decode(buf)?)),
        MacControl::Rts => Ok(DecodedFrame::Rts(RtsFrame::decode(buf)?)),
        MacControl::Cts => Ok(DecodedFrame::Cts(CtsFrame::decode(buf)?)),
        MacControl::WakeBeacon => Ok(DecodedFrame::WakeBeacon(WakeFrame::decode(buf)?)),
        MacControl::WakeAck => Ok(DecodedFrame::WakeAck(WakeFrame::decode(buf)?)),
    }
}

/// ACK control frame (5 bytes): `ctrl, src, dst, seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckFrame {
    pub src: u8,
    pub dst: u8,
    pub seq: u16,
}

impl AckFrame {
    pub const LEN: usize = 5;

    pub fn encode(src: u8, dst: u8, seq: u16, buf: &mut [u8]) -> usize {
        buf[0] = MacControl::Ack as u8;
        buf[1] = src;
        buf[2] = dst;
        LittleEndian::write_u16(&mut buf[3..5], seq);
        Self::LEN
    }

    fn decode<E>(buf: &[u8]) -> Result<Self, NetError<E>> {
        if buf.len() < Self::LEN {
            return Err(NetError::Truncated);
        }
        Ok(Self { src: buf[1], dst: buf[2], seq: LittleEndian::read_u16(&buf[3..5]) })
    }
}

/// RTS/CTS control frame (5 bytes each): `ctrl, src, dst, msg_len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtsFrame {
    pub src: u8,
    pub dst: u8,
    pub msg_len: u16,
}

impl RtsFrame {
    pub const LEN: usize = 5;

    pub fn encode(src: u8, dst: u8, msg_len: u16, buf: &mut [u8]) -> usize {
        buf[0] = MacControl::Rts as u8;
        buf[1] = src;
        buf[2] = dst;
        LittleEndian::write_u16(&mut buf[3..5], msg_len);
        Self::LEN
    }

    fn decode<E>(buf: &[u8]) -> Result<Self, NetError<E>> {
        if buf.len() < Self::LEN {
            return Err(NetError::Truncated);
        }
        Ok(Self { src: buf[1], dst: buf[2], msg_len: LittleEndian::read_u16(&buf[3..5]) })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtsFrame {
    pub src: u8,
    pub dst: u8,
    pub msg_len: u16,
}

impl CtsFrame {
    pub const LEN: usize = 5;

    pub fn encode(src: u8, dst: u8, msg_len: u16, buf: &mut [u8]) -> usize {
        buf[0] = MacControl::Cts as u8;
        buf[1] = src;
        buf[2] = dst;
        LittleEndian::write_u16(&mut buf[3..5], msg_len);
        Self::LEN
    }

    fn decode<E>(buf: &[u8]) -> Result<Self, NetError<E>> {
        if buf.len() < Self::LEN {
            return Err(NetError::Truncated);
        }
        Ok(Self { src: buf[1], dst: buf[2], msg_len: LittleEndian::read_u16(&buf[3..5]) })
    }
}

/// Wake-beacon / wake-ack (3 bytes each): `ctrl, src, dst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeFrame {
    pub src: u8,
    pub dst: u8,
}

impl WakeFrame {
    pub const LEN: usize = 3;

    pub fn encode(ctrl: MacControl, src: u8, dst: u8, buf: &mut [u8]) -> usize {
        buf[0] = ctrl as u8;
        buf[1] = src;
        buf[2] = dst;
        Self::LEN
    }

    fn decode<E>(buf: &[u8]) -> Result<Self, NetError<E>> {
        if buf.len() < Self::LEN {
            return Err(NetError::Truncated);
        }
        Ok(Self { src: buf[1], dst: buf[2] })
    }
}

/// Routing-level control byte (§3/§4.4/§4.5): the first byte of a MAC data
/// frame's payload. `Data` carries an application datagram (optionally
/// ProtoMon-wrapped, see [`MonitorHeader`]); `Beacon` and `Topology` are
/// routing-maintenance traffic; `MacMetrics`/`RoutingMetrics` are ProtoMon's
/// own metric-delivery reports, sent with the *unwrapped* routing send so
/// they never recurse into the monitoring overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RoutingControl {
    Data = 0x01,
    Beacon = 0x02,
    Topology = 0x03,
    MacMetrics = 0x04,
    RoutingMetrics = 0x05,
}

impl RoutingControl {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(RoutingControl::Data),
            0x02 => Some(RoutingControl::Beacon),
            0x03 => Some(RoutingControl::Topology),
            0x04 => Some(RoutingControl::MacMetrics),
            0x05 => Some(RoutingControl::RoutingMetrics),
            _ => None,
        }
    }
}

/// Routing data/topology frame header (8 bytes, from `STRP.c`'s
/// `headerSize = 8`): `ctrl, dst, src, parent, num_hops, len`. `parent` and
/// `num_hops` here are STRP's own forwarding bookkeeping (used only for the
/// "FWD: src (hops) -> parent" log line), independent of the ProtoMon
/// hop-count carried in [`MonitorHeader`] (§9 Open Question resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingHeader {
    pub ctrl: RoutingControl,
    pub dst: u8,
    pub src: u8,
    pub parent: u8,
    pub num_hops: u16,
    pub len: u16,
}

pub const ROUTING_HEADER_LEN: usize = 8;

impl RoutingHeader {
    /// `buf` should be at least `MAX_ROUTING_FRAME_LEN` bytes (the true
    /// worst case with ProtoMon's monitoring prefix and path trace applied,
    /// §4.5); an oversized `payload` is truncated to fit rather than
    /// panicking, and a warning is logged.
    pub fn encode(&self, payload: &[u8], buf: &mut [u8]) -> usize {
        let max_payload = buf.len().saturating_sub(ROUTING_HEADER_LEN);
        let payload = if payload.len() > max_payload {
            warn!("routing frame payload ({} bytes) truncated to fit {}-byte buffer", payload.len(), buf.len());
            &payload[..max_payload]
        } else {
            payload
        };
        buf[0] = self.ctrl as u8;
        buf[1] = self.dst;
        buf[2] = self.src;
        buf[3] = self.parent;
        LittleEndian::write_u16(&mut buf[4..6], self.num_hops);
        LittleEndian::write_u16(&mut buf[6..8], payload.len() as u16);
        buf[ROUTING_HEADER_LEN..ROUTING_HEADER_LEN + payload.len()].copy_from_slice(payload);
        ROUTING_HEADER_LEN + payload.len()
    }

    pub fn decode<E>(buf: &[u8]) -> Result<(Self, &[u8]), NetError<E>> {
        if buf.len() < ROUTING_HEADER_LEN {
            return Err(NetError::Truncated);
        }
        let ctrl = RoutingControl::from_byte(buf[0]).ok_or(NetError::UnknownControl(buf[0]))?;
        let dst = buf[1];
        let src = buf[2];
        let parent = buf[3];
        let num_hops = LittleEndian::read_u16(&buf[4..6]);
        let len = LittleEndian::read_u16(&buf[6..8]);
        let end = ROUTING_HEADER_LEN + len as usize;
        if buf.len() < end {
            return Err(NetError::Truncated);
        }
        Ok((Self { ctrl, dst, src, parent, num_hops, len }, &buf[ROUTING_HEADER_LEN..end]))
    }
}

/// Beacon (3 bytes, from `STRP.c`'s `Beacon`): `ctrl, parent, parent_rssi`.
/// Carried as the payload of a broadcast MAC data frame whose routing
/// header has `ctrl = RoutingControl::Beacon`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconFrame {
    pub parent: u8,
    pub parent_rssi: i8,
}

impl BeaconFrame {
    pub const LEN: usize = 2;

    pub fn encode(&self, buf: &mut [u8]) -> usize {
        buf[0] = self.parent;
        buf[1] = self.parent_rssi as u8;
        Self::LEN
    }

    pub fn decode<E>(buf: &[u8]) -> Result<Self, NetError<E>> {
        if buf.len() < Self::LEN {
            return Err(NetError::Truncated);
        }
        Ok(Self { parent: buf[0], parent_rssi: buf[1] as i8 })
    }
}

/// One row of a topology report (20 bytes, from `STRP.c`'s
/// `buildRoutingTablePkt`): `addr, state, link, parent, rssi, parent_rssi,
/// last_seen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopologyRow {
    pub addr: u8,
    pub state: u8,
    pub link: u8,
    pub parent: u8,
    pub rssi: i32,
    pub parent_rssi: i32,
    pub last_seen: i64,
}

impl TopologyRow {
    pub const LEN: usize = 20;

    pub fn encode(&self, buf: &mut [u8]) -> usize {
        buf[0] = self.addr;
        buf[1] = self.state;
        buf[2] = self.link;
        buf[3] = self.parent;
        LittleEndian::write_i32(&mut buf[4..8], self.rssi);
        LittleEndian::write_i32(&mut buf[8..12], self.parent_rssi);
        LittleEndian::write_i64(&mut buf[12..20], self.last_seen);
        Self::LEN
    }

    pub fn decode<E>(buf: &[u8]) -> Result<Self, NetError<E>> {
        if buf.len() < Self::LEN {
            return Err(NetError::Truncated);
        }
        Ok(Self {
            addr: buf[0],
            state: buf[1],
            link: buf[2],
            parent: buf[3],
            rssi: LittleEndian::read_i32(&buf[4..8]),
            parent_rssi: LittleEndian::read_i32(&buf[8..12]),
            last_seen: LittleEndian::read_i64(&buf[12..20]),
        })
    }
}

/// ProtoMon's per-datagram monitoring prefix (§4.5): prepended to an
/// application payload when routing monitoring is enabled. `hop_count`
/// starts at zero and is incremented in place by the MAC-level wrapper on
/// every relay; `send_timestamp` is milliseconds since the node's `Timer`
/// epoch. The path trace is appended as a trailing `-<addr>`-separated
/// string rather than a fixed-width field, since its length grows with hop
/// count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorHeader {
    pub hop_count: u8,
    pub send_timestamp: u64,
}

impl MonitorHeader {
    pub const LEN: usize = 9;

    pub fn encode(&self, buf: &mut [u8]) -> usize {
        buf[0] = self.hop_count;
        LittleEndian::write_u64(&mut buf[1..9], self.send_timestamp);
        Self::LEN
    }

    pub fn decode<E>(buf: &[u8]) -> Result<Self, NetError<E>> {
        if buf.len() < Self::LEN {
            return Err(NetError::Truncated);
        }
        Ok(Self { hop_count: buf[0], send_timestamp: LittleEndian::read_u64(&buf[1..9]) })
    }
}

/// The separator used to join path-trace address tokens (§4.5: "must not
/// be a comma, since the whole metrics stream is CSV").
pub const PATH_SEPARATOR: char = '-';

/// Worst-case length of the path-trace string ProtoMon appends to a
/// monitored datagram: the originator's two-hex-digit token plus one
/// further `-XX` per hop. `hop_count` is stored in a `u8`
/// ([`MonitorHeader::hop_count`]), so `u8::MAX` hops is the true upper
/// bound, not an estimate of a realistic network diameter.
pub const MAX_PATH_LEN: usize = 2 + 3 * u8::MAX as usize;

/// Worst-case length of a routing frame's payload: the largest legal
/// application datagram (§1: "≤240-byte application datagrams"), plus
/// ProtoMon's monitoring prefix and path trace at their largest (§4.5).
pub const MAX_MONITORED_PAYLOAD_LEN: usize = MonitorHeader::LEN + MAX_PAYLOAD_LEN + MAX_PATH_LEN;

/// Worst-case length of an encoded routing frame (header + payload above).
pub const MAX_ROUTING_FRAME_LEN: usize = ROUTING_HEADER_LEN + MAX_MONITORED_PAYLOAD_LEN;

/// Worst-case length of an encoded MAC data frame (header + the routing
/// frame it carries as payload). This is the size every MAC variant's
/// send/receive scratch buffer must be, since a 240-byte application
/// datagram with monitoring enabled does not fit in
/// `MAC_HEADER_LEN + MAX_PAYLOAD_LEN` alone.
pub const MAX_MAC_FRAME_LEN: usize = MAC_HEADER_LEN + MAX_ROUTING_FRAME_LEN;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_data_round_trips() {
        let mut buf = [0u8; 64];
        let n = MacHeader::encode_data(0x07, 0x01, 42, b"ping", &mut buf);
        match decode::<()>(&buf[..n]).unwrap() {
            DecodedFrame::Data { header, payload } => {
                assert_eq!(header.src, 0x07);
                assert_eq!(header.dst, 0x01);
                assert_eq!(header.seq, 42);
                assert_eq!(payload, b"ping");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn mac_data_checksum_mismatch_detected() {
        let mut buf = [0u8; 64];
        let n = MacHeader::encode_data(0x07, 0x01, 42, b"ping", &mut buf);
        buf[7] ^= 0xFF;
        assert!(matches!(decode::<()>(&buf[..n]), Err(NetError::ChecksumMismatch)));
    }

    #[test]
    fn checksum_invariant_under_byte_reorder() {
        let payload = [5u8, 1, 9, 3, 7];
        let mut shuffled = payload;
        shuffled.reverse();
        assert_eq!(checksum(&payload), checksum(&shuffled));
    }

    #[test]
    fn ack_round_trips() {
        let mut buf = [0u8; AckFrame::LEN];
        AckFrame::encode(0x01, 0x07, 42, &mut buf);
        match decode::<()>(&buf).unwrap() {
            DecodedFrame::Ack(ack) => {
                assert_eq!(ack.src, 0x01);
                assert_eq!(ack.dst, 0x07);
                assert_eq!(ack.seq, 42);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_control_byte_rejected() {
        let buf = [0xEEu8, 0, 0, 0, 0];
        assert!(matches!(decode::<()>(&buf), Err(NetError::UnknownControl(0xEE))));
    }

    #[test]
    fn routing_header_round_trips() {
        let header = RoutingHeader { ctrl: RoutingControl::Data, dst: 0x01, src: 0x0D, parent: 0x07, num_hops: 0, len: 0 };
        let mut buf = [0u8; 64];
        let n = header.encode(b"abcd", &mut buf);
        let (decoded, payload) = RoutingHeader::decode::<()>(&buf[..n]).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(payload, b"abcd");
    }

    #[test]
    fn encode_data_fits_max_legal_payload_with_monitoring_overhead() {
        // Worst case: a 240-byte application datagram (§1) plus ProtoMon's
        // MonitorHeader and a path trace at its largest (§4.5), wrapped in a
        // routing header, handed to the MAC layer as its payload. Buffers
        // sized to MAX_ROUTING_FRAME_LEN/MAX_MAC_FRAME_LEN must hold this
        // without truncation.
        let routing_payload = vec![0xABu8; MAX_MONITORED_PAYLOAD_LEN];
        let header = RoutingHeader { ctrl: RoutingControl::Data, dst: 0x01, src: 0x0D, parent: 0x07, num_hops: 0, len: 0 };
        let mut routing_buf = vec![0u8; MAX_ROUTING_FRAME_LEN];
        let routing_len = header.encode(&routing_payload, &mut routing_buf);
        assert_eq!(routing_len, ROUTING_HEADER_LEN + MAX_MONITORED_PAYLOAD_LEN);

        let mut mac_buf = vec![0u8; MAX_MAC_FRAME_LEN];
        let mac_len = MacHeader::encode_data(0x0D, 0x01, 1, &routing_buf[..routing_len], &mut mac_buf);
        assert_eq!(mac_len, MAC_HEADER_LEN + routing_len);

        match decode::<()>(&mac_buf[..mac_len]).unwrap() {
            DecodedFrame::Data { payload, .. } => assert_eq!(payload.len(), routing_len),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn encode_data_truncates_instead_of_panicking_when_buffer_too_small() {
        let payload = [0xAAu8; 32];
        let mut buf = [0u8; MAC_HEADER_LEN + 10];
        let n = MacHeader::encode_data(0x07, 0x01, 1, &payload, &mut buf);
        assert_eq!(n, buf.len());
        match decode::<()>(&buf[..n]).unwrap() {
            DecodedFrame::Data { payload: decoded, .. } => assert_eq!(decoded.len(), 10),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn beacon_round_trips() {
        let beacon = BeaconFrame { parent: 0x01, parent_rssi: -42 };
        let mut buf = [0u8; BeaconFrame::LEN];
        beacon.encode(&mut buf);
        assert_eq!(BeaconFrame::decode::<()>(&buf).unwrap(), beacon);
    }

    #[test]
    fn topology_row_round_trips() {
        let row = TopologyRow { addr: 0x0A, state: 1, link: 2, parent: 0x01, rssi: -60, parent_rssi: -40, last_seen: 1_700_000_000 };
        let mut buf = [0u8; TopologyRow::LEN];
        row.encode(&mut buf);
        assert_eq!(TopologyRow::decode::<()>(&buf).unwrap(), row);
    }
}
