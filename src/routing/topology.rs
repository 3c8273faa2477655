//! Topology report (de)serialisation (§4.4), grounded in `STRP.c`'s
//! `buildRoutingTablePkt`/`parseRoutingTablePkt`: a node-count byte followed
//! by that many fixed-size [`TopologyRow`] records.

use crate::error::NetError;
use crate::neighbor::{LinkRole, NeighbourEntry, NodeState};
use crate::packet::TopologyRow;

/// A topology report as carried by a single `RoutingControl::Topology` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyReport {
    /// Address of the node this report describes (its own neighbour table).
    pub reporter: u8,
    pub rows: Vec<TopologyRow>,
}

fn state_byte(s: NodeState) -> u8 {
    match s {
        NodeState::Unknown => 0,
        NodeState::Active => 1,
        NodeState::Inactive => 2,
    }
}

fn link_byte(l: LinkRole) -> u8 {
    match l {
        LinkRole::Idle => 0,
        LinkRole::Outbound => 1,
        LinkRole::Inbound => 2,
    }
}

fn row_from_entry(e: NeighbourEntry) -> TopologyRow {
    TopologyRow {
        addr: e.addr,
        state: state_byte(e.state),
        link: link_byte(e.link),
        parent: e.parent,
        rssi: e.rssi as i32,
        parent_rssi: e.parent_rssi as i32,
        last_seen: e.last_seen as i64,
    }
}

impl TopologyReport {
    pub fn from_neighbours(reporter: u8, entries: &[NeighbourEntry]) -> Self {
        Self { reporter, rows: entries.iter().copied().map(row_from_entry).collect() }
    }

    /// `count` byte followed by `count * TopologyRow::LEN` bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.rows.len() * TopologyRow::LEN);
        buf.push(self.rows.len() as u8);
        let mut row_buf = [0u8; TopologyRow::LEN];
        for row in &self.rows {
            row.encode(&mut row_buf);
            buf.extend_from_slice(&row_buf);
        }
        buf
    }

    pub fn decode<E>(reporter: u8, buf: &[u8]) -> Result<Self, NetError<E>> {
        if buf.is_empty() {
            return Err(NetError::Truncated);
        }
        let count = buf[0] as usize;
        let mut rows = Vec::with_capacity(count);
        let mut offset = 1;
        for _ in 0..count {
            if buf.len() < offset + TopologyRow::LEN {
                return Err(NetError::Truncated);
            }
            rows.push(TopologyRow::decode::<E>(&buf[offset..offset + TopologyRow::LEN])?);
            offset += TopologyRow::LEN;
        }
        Ok(Self { reporter, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_round_trips() {
        let report = TopologyReport::from_neighbours(0x01, &[]);
        let encoded = report.encode();
        let decoded = TopologyReport::decode::<()>(0x01, &encoded).unwrap();
        assert_eq!(decoded, report);
    }

    #[test]
    fn populated_table_round_trips() {
        let entry =
            NeighbourEntry { addr: 0x07, state: NodeState::Active, link: LinkRole::Outbound, rssi: -50, parent: 0x01, parent_rssi: -40, last_seen: 1234 };
        let report = TopologyReport::from_neighbours(0x0D, &[entry]);
        let encoded = report.encode();
        let decoded = TopologyReport::decode::<()>(0x0D, &encoded).unwrap();
        assert_eq!(decoded.rows[0].addr, 0x07);
        assert_eq!(decoded.rows[0].rssi, -50);
    }

    #[test]
    fn truncated_row_is_rejected() {
        let buf = [1u8, 0, 0, 0];
        assert!(matches!(TopologyReport::decode::<()>(0x01, &buf), Err(NetError::Truncated)));
    }
}
