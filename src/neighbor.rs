//! C2 — neighbour table.
//!
//! Direct-indexed `[Option<NeighbourEntry>; 256]`, one per possible address,
//! grounded in `STRP.c`'s `ActiveNodes`/`NodeInfo` (`nodes[MAX_ACTIVE_NODES]`,
//! `numActive`, `numNodes`, `lastCleanupTime`, `minAddr`/`maxAddr`). A single
//! `Mutex` owns the whole table (§9 design note: "one mutex per logically
//! independent structure" — the table is one such structure).

use std::sync::Mutex;

use crate::timer::Millis;

pub const BROADCAST_ADDR: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unknown,
    Active,
    Inactive,
}

/// IDLE = peer, OUTBOUND = my current parent, INBOUND = a peer claiming me as parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Idle,
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, Copy)]
pub struct NeighbourEntry {
    pub addr: u8,
    pub state: NodeState,
    pub link: LinkRole,
    pub rssi: i8,
    pub parent: u8,
    pub parent_rssi: i8,
    pub last_seen: Millis,
}

impl NeighbourEntry {
    fn unknown(addr: u8) -> Self {
        Self {
            addr,
            state: NodeState::Unknown,
            link: LinkRole::Idle,
            rssi: -128,
            parent: BROADCAST_ADDR,
            parent_rssi: -128,
            last_seen: 0,
        }
    }
}

struct Table {
    entries: Vec<Option<NeighbourEntry>>,
    num_active: usize,
    num_known: usize,
    last_cleanup: Millis,
    min_addr: u8,
    max_addr: u8,
}

impl Table {
    fn new() -> Self {
        Self {
            entries: vec![None; 256],
            num_active: 0,
            num_known: 0,
            last_cleanup: 0,
            min_addr: u8::MAX,
            max_addr: 0,
        }
    }

    fn touch_bounds(&mut self, addr: u8) {
        if self.num_known == 0 {
            self.min_addr = addr;
            self.max_addr = addr;
        } else {
            self.min_addr = self.min_addr.min(addr);
            self.max_addr = self.max_addr.max(addr);
        }
    }
}

pub struct NeighbourTable {
    inner: Mutex<Table>,
    self_addr: u8,
}

/// Reported by [`NeighbourTable::observe`]'s caller: the peer-advertised
/// parent used to derive the new link role (§4.2's link-role rule).
pub struct Observation {
    pub addr: u8,
    pub rssi: i8,
    pub peer_parent: u8,
    pub peer_parent_rssi: i8,
    pub now: Millis,
}

impl NeighbourTable {
    pub fn new(self_addr: u8) -> Self {
        Self { inner: Mutex::new(Table::new()), self_addr }
    }

    /// Record an observation of `addr` (data/routing packet, beacon, or loop
    /// detection — §4.2's three update events), refreshing `last_seen`,
    /// `rssi`, `link` and transitioning `state` to ACTIVE.
    pub fn observe(&self, obs: Observation, current_parent: u8) {
        let mut table = self.inner.lock().unwrap();
        table.touch_bounds(obs.addr);
        let idx = obs.addr as usize;
        let was_unknown = table.entries[idx].is_none();
        let entry = table.entries[idx].get_or_insert_with(|| NeighbourEntry::unknown(obs.addr));

        let was_active = entry.state == NodeState::Active;
        entry.last_seen = obs.now;
        entry.rssi = obs.rssi;
        entry.parent = obs.peer_parent;
        entry.parent_rssi = obs.peer_parent_rssi;
        entry.link = if obs.addr == current_parent {
            LinkRole::Outbound
        } else if obs.peer_parent == self.self_addr {
            LinkRole::Inbound
        } else {
            LinkRole::Idle
        };
        entry.state = NodeState::Active;

        if was_unknown {
            table.num_known += 1;
        }
        if !was_active {
            table.num_active += 1;
        }
    }

    pub fn get(&self, addr: u8) -> Option<NeighbourEntry> {
        self.inner.lock().unwrap().entries[addr as usize]
    }

    /// Mark `addr`'s link role explicitly, used when the routing engine
    /// changes parent (old parent -> IDLE, new parent -> OUTBOUND).
    pub fn set_link(&self, addr: u8, link: LinkRole) {
        let mut table = self.inner.lock().unwrap();
        if let Some(entry) = table.entries[addr as usize].as_mut() {
            entry.link = link;
        }
    }

    /// Sweep `[min_addr, max_addr]` (§4.2) transitioning ACTIVE entries whose
    /// `now - last_seen >= node_timeout_ms` to INACTIVE. Returns the address
    /// of the current parent if it was just marked inactive, so the caller
    /// can trigger a parent change.
    pub fn cleanup(&self, now: Millis, node_timeout_ms: Millis, current_parent: u8) -> Option<u8> {
        let mut table = self.inner.lock().unwrap();
        table.last_cleanup = now;
        let (min_addr, max_addr) = (table.min_addr, table.max_addr);
        if table.num_known == 0 {
            return None;
        }
        let mut parent_timed_out = None;
        for addr in min_addr..=max_addr {
            if let Some(entry) = table.entries[addr as usize].as_mut() {
                if entry.state == NodeState::Active && now.saturating_sub(entry.last_seen) >= node_timeout_ms {
                    entry.state = NodeState::Inactive;
                    entry.link = LinkRole::Idle;
                    table.num_active -= 1;
                    if addr == current_parent {
                        parent_timed_out = Some(addr);
                    }
                }
            }
        }
        parent_timed_out
    }

    pub fn last_cleanup(&self) -> Millis {
        self.inner.lock().unwrap().last_cleanup
    }

    pub fn num_active(&self) -> usize {
        self.inner.lock().unwrap().num_active
    }

    pub fn num_known(&self) -> usize {
        self.inner.lock().unwrap().num_known
    }

    /// All known entries, for topology-report serialisation (§4.4).
    pub fn snapshot(&self) -> Vec<NeighbourEntry> {
        self.inner.lock().unwrap().entries.iter().filter_map(|e| *e).collect()
    }

    /// Candidates eligible as a new parent under the configured strategy
    /// (§4.4): any ACTIVE peer whose link is not INBOUND (a child is never
    /// eligible as parent).
    pub fn parent_candidates(&self) -> Vec<NeighbourEntry> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter_map(|e| *e)
            .filter(|e| e.state == NodeState::Active && e.link != LinkRole::Inbound)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(addr: u8, now: Millis) -> Observation {
        Observation { addr, rssi: -50, peer_parent: BROADCAST_ADDR, peer_parent_rssi: -128, now }
    }

    #[test]
    fn observe_marks_active_and_updates_bounds() {
        let table = NeighbourTable::new(0x01);
        table.observe(obs(0x07, 100), BROADCAST_ADDR);
        let entry = table.get(0x07).unwrap();
        assert_eq!(entry.state, NodeState::Active);
        assert_eq!(entry.last_seen, 100);
        assert_eq!(table.num_known(), 1);
        assert_eq!(table.num_active(), 1);
    }

    #[test]
    fn link_role_follows_current_parent() {
        let table = NeighbourTable::new(0x01);
        table.observe(obs(0x07, 100), 0x07);
        assert_eq!(table.get(0x07).unwrap().link, LinkRole::Outbound);
    }

    #[test]
    fn link_role_inbound_when_peer_claims_self_as_parent() {
        let table = NeighbourTable::new(0x01);
        let mut o = obs(0x07, 100);
        o.peer_parent = 0x01;
        table.observe(o, BROADCAST_ADDR);
        assert_eq!(table.get(0x07).unwrap().link, LinkRole::Inbound);
    }

    #[test]
    fn cleanup_times_out_stale_entries() {
        let table = NeighbourTable::new(0x01);
        table.observe(obs(0x0C, 0), BROADCAST_ADDR);
        let timed_out_parent = table.cleanup(5_001, 5_000, 0x0C);
        assert_eq!(timed_out_parent, Some(0x0C));
        assert_eq!(table.get(0x0C).unwrap().state, NodeState::Inactive);
        assert_eq!(table.get(0x0C).unwrap().link, LinkRole::Idle);
        assert_eq!(table.num_active(), 0);
    }

    #[test]
    fn cleanup_leaves_fresh_entries_active() {
        let table = NeighbourTable::new(0x01);
        table.observe(obs(0x0C, 1_000), BROADCAST_ADDR);
        let timed_out = table.cleanup(2_000, 5_000, 0xFF);
        assert_eq!(timed_out, None);
        assert_eq!(table.get(0x0C).unwrap().state, NodeState::Active);
    }

    #[test]
    fn inbound_peers_are_not_parent_candidates() {
        let table = NeighbourTable::new(0x01);
        let mut child = obs(0x07, 100);
        child.peer_parent = 0x01;
        table.observe(child, BROADCAST_ADDR);
        table.observe(obs(0x09, 100), BROADCAST_ADDR);
        let candidates: Vec<u8> = table.parent_candidates().iter().map(|e| e.addr).collect();
        assert_eq!(candidates, vec![0x09]);
    }
}
