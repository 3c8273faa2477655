//! Per-peer metric tables (§4.5), grounded in `STRP_Aloha/ProtoMon/ProtoMon.c`'s
//! `MACMetrics`/`RoutingMetrics` (`MAC_Data`/`Routing_Data` arrays indexed by
//! address, each behind one `sem_t mutex`). `metric.c`'s generic
//! `Metric`/`Parameter` column abstraction is not carried over (it exists in
//! the C source only to work around the lack of generics); the typed
//! structs below implement the same behaviour directly.

use std::sync::Mutex;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::NetError;
use crate::neighbor::BROADCAST_ADDR;

/// One address's accumulated MAC-layer counters (`MAC_Data` in the source:
/// `sent`, `recv`, `latency`, plus `broadcast` carried separately here since
/// the source tracks it as a MAC-level send-path counter).
#[derive(Debug, Clone, Copy, Default)]
pub struct MacPeerMetric {
    pub sent: u32,
    pub received: u32,
    pub cumulative_latency_ms: u64,
    pub broadcast_count: u32,
}

/// One address's accumulated routing-layer (end-to-end) counters
/// (`Routing_Data` in the source: `sent`, `recv`, `latency`, `path`).
#[derive(Debug, Clone, Default)]
pub struct RoutingPeerMetric {
    pub e2e_sent: u32,
    pub e2e_received: u32,
    pub last_hop_count: u8,
    pub cumulative_latency_ms: u64,
    pub path: String,
}

/// Direct-indexed `[T; 256]` behind a single mutex, mirroring the source's
/// one-`sem_t`-per-table discipline (§9 "one mutex per logically
/// independent structure").
pub struct MetricTable<T> {
    rows: Mutex<Vec<T>>,
}

impl<T: Clone + Default> MetricTable<T> {
    pub fn new() -> Self {
        Self { rows: Mutex::new(vec![T::default(); 256]) }
    }

    pub fn with_mut<R>(&self, addr: u8, f: impl FnOnce(&mut T) -> R) -> R {
        let mut rows = self.rows.lock().unwrap();
        f(&mut rows[addr as usize])
    }

    pub fn get(&self, addr: u8) -> T {
        self.rows.lock().unwrap()[addr as usize].clone()
    }

    /// Snapshot every non-default row whose address has seen traffic
    /// (`addr != 0` guards the sink's own self-row from showing up as a
    /// peer of address 0, matching `minAddr`/`maxAddr`-bounded scans in the
    /// source). Used by the reporter thread to serialise a report and by
    /// the sink to iterate received reports.
    pub fn snapshot(&self, has_traffic: impl Fn(&T) -> bool) -> Vec<(u8, T)> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter(|(addr, row)| *addr as u16 != BROADCAST_ADDR as u16 && has_traffic(row))
            .map(|(addr, row)| (addr as u8, row.clone()))
            .collect()
    }

    /// Clear every row (`resetMacMetrics`/`resetRoutingMetrics` in the
    /// source), called after each periodic report is sent.
    pub fn clear(&self) {
        let mut rows = self.rows.lock().unwrap();
        for row in rows.iter_mut() {
            *row = T::default();
        }
    }
}

impl<T: Clone + Default> Default for MetricTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub type MacMetrics = MetricTable<MacPeerMetric>;
pub type RoutingMetrics = MetricTable<RoutingPeerMetric>;

/// Wire encoding of a batch of `MacPeerMetric` rows for the `CTRL_MAC`
/// report (§4.5 "serialises each enabled layer's metrics"): a count byte
/// followed by that many fixed 9-byte rows, mirroring `macParams`'
/// `{TotalSent, TotalRecv, AvgLatency}` columns plus the broadcast counter.
pub fn encode_mac_report(rows: &[(u8, MacPeerMetric)]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + rows.len() * 9);
    buf.push(rows.len() as u8);
    for (addr, row) in rows {
        let avg_latency = if row.received > 0 { (row.cumulative_latency_ms / row.received as u64) as u16 } else { 0 };
        buf.push(*addr);
        let mut field = [0u8; 2];
        LittleEndian::write_u16(&mut field, row.sent.min(u16::MAX as u32) as u16);
        buf.extend_from_slice(&field);
        LittleEndian::write_u16(&mut field, row.received.min(u16::MAX as u32) as u16);
        buf.extend_from_slice(&field);
        LittleEndian::write_u16(&mut field, avg_latency);
        buf.extend_from_slice(&field);
        LittleEndian::write_u16(&mut field, row.broadcast_count.min(u16::MAX as u32) as u16);
        buf.extend_from_slice(&field);
    }
    buf
}

pub fn decode_mac_report<E>(buf: &[u8]) -> Result<Vec<(u8, MacPeerMetric)>, NetError<E>> {
    if buf.is_empty() {
        return Err(NetError::Truncated);
    }
    let count = buf[0] as usize;
    let mut rows = Vec::with_capacity(count);
    let mut offset = 1;
    for _ in 0..count {
        if buf.len() < offset + 9 {
            return Err(NetError::Truncated);
        }
        let addr = buf[offset];
        let sent = LittleEndian::read_u16(&buf[offset + 1..offset + 3]);
        let received = LittleEndian::read_u16(&buf[offset + 3..offset + 5]);
        let avg_latency = LittleEndian::read_u16(&buf[offset + 5..offset + 7]);
        let broadcast_count = LittleEndian::read_u16(&buf[offset + 7..offset + 9]);
        rows.push((
            addr,
            MacPeerMetric {
                sent: sent as u32,
                received: received as u32,
                cumulative_latency_ms: avg_latency as u64 * received as u64,
                broadcast_count: broadcast_count as u32,
            },
        ));
        offset += 9;
    }
    Ok(rows)
}

/// Wire encoding of a batch of `RoutingPeerMetric` rows for the `CTRL_ROU`
/// report, mirroring `routingParams`' `{NumHops, TotalSent, TotalRecv,
/// AvgLatency, Path}` columns. Variable-length because of the trailing
/// path string, so each row is length-prefixed rather than fixed-size.
pub fn encode_routing_report(rows: &[(u8, RoutingPeerMetric)]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + rows.len() * 16);
    buf.push(rows.len() as u8);
    for (addr, row) in rows {
        let avg_latency = if row.e2e_received > 0 { (row.cumulative_latency_ms / row.e2e_received as u64) as u16 } else { 0 };
        buf.push(*addr);
        buf.push(row.last_hop_count);
        let mut field = [0u8; 2];
        LittleEndian::write_u16(&mut field, row.e2e_sent.min(u16::MAX as u32) as u16);
        buf.extend_from_slice(&field);
        LittleEndian::write_u16(&mut field, row.e2e_received.min(u16::MAX as u32) as u16);
        buf.extend_from_slice(&field);
        LittleEndian::write_u16(&mut field, avg_latency);
        buf.extend_from_slice(&field);
        let path_bytes = row.path.as_bytes();
        buf.push(path_bytes.len() as u8);
        buf.extend_from_slice(path_bytes);
    }
    buf
}

pub fn decode_routing_report<E>(buf: &[u8]) -> Result<Vec<(u8, RoutingPeerMetric)>, NetError<E>> {
    if buf.is_empty() {
        return Err(NetError::Truncated);
    }
    let count = buf[0] as usize;
    let mut rows = Vec::with_capacity(count);
    let mut offset = 1;
    for _ in 0..count {
        if buf.len() < offset + 8 {
            return Err(NetError::Truncated);
        }
        let addr = buf[offset];
        let last_hop_count = buf[offset + 1];
        let e2e_sent = LittleEndian::read_u16(&buf[offset + 2..offset + 4]);
        let e2e_received = LittleEndian::read_u16(&buf[offset + 4..offset + 6]);
        let avg_latency = LittleEndian::read_u16(&buf[offset + 6..offset + 8]);
        let path_len = buf[offset + 8] as usize;
        offset += 9;
        if buf.len() < offset + path_len {
            return Err(NetError::Truncated);
        }
        let path = String::from_utf8_lossy(&buf[offset..offset + path_len]).into_owned();
        offset += path_len;
        rows.push((
            addr,
            RoutingPeerMetric {
                e2e_sent: e2e_sent as u32,
                e2e_received: e2e_received as u32,
                last_hop_count,
                cumulative_latency_ms: avg_latency as u64 * e2e_received as u64,
                path,
            },
        ));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_mut_updates_the_addressed_row() {
        let table: MacMetrics = MetricTable::new();
        table.with_mut(0x07, |row| row.sent += 1);
        table.with_mut(0x07, |row| row.sent += 1);
        assert_eq!(table.get(0x07).sent, 2);
        assert_eq!(table.get(0x09).sent, 0);
    }

    #[test]
    fn clear_resets_every_row() {
        let table: MacMetrics = MetricTable::new();
        table.with_mut(0x07, |row| row.sent = 5);
        table.clear();
        assert_eq!(table.get(0x07).sent, 0);
    }

    #[test]
    fn snapshot_only_returns_rows_with_traffic() {
        let table: MacMetrics = MetricTable::new();
        table.with_mut(0x07, |row| row.sent = 3);
        let snapshot = table.snapshot(|row| row.sent > 0 || row.received > 0);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, 0x07);
    }
}
