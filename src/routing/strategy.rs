//! Parent-selection strategies (§4.4), grounded in `STRP.c`'s
//! `selectNextLowerNeighbour`/`selectRandomNeighbour`/`selectRandomLowerNeighbour`/
//! `selectClosestNeighbour`/`selectClosestLowerNeighbour` and the reactive
//! per-observation check inlined in `updateActiveNodes`.
//!
//! Two distinct moments call into this module (§4.4: "evaluated both
//! reactively ... and on demand"): [`reactive_replace`] answers "should this
//! single newly-observed neighbour replace my current parent right now?"
//! while [`select`] does the on-demand full-table rescan used when the
//! current parent times out or a loop is detected.

use rand::Rng;

use crate::neighbor::{LinkRole, NeighbourEntry, NeighbourTable};

pub const MIN_RSSI: i8 = i8::MIN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentStrategy {
    NextLower,
    Random,
    RandomLower,
    Closest,
    ClosestLower,
    Fixed(u8),
}

/// §4.4 reactive check: "choose c given current parent p" as each new
/// observation arrives, before any full rescan happens. A child is never
/// eligible (callers only invoke this with already-filtered candidates).
pub fn reactive_replace(strategy: ParentStrategy, self_addr: u8, candidate: u8, candidate_rssi: i8, current_rssi: i8) -> bool {
    match strategy {
        ParentStrategy::NextLower => candidate > 0 && candidate < self_addr,
        ParentStrategy::Random => rand::thread_rng().gen_range(0..100) < 50,
        ParentStrategy::RandomLower => candidate < self_addr && rand::thread_rng().gen_range(0..100) < 50,
        ParentStrategy::Closest => candidate_rssi > current_rssi,
        ParentStrategy::ClosestLower => candidate_rssi > current_rssi && candidate < self_addr,
        ParentStrategy::Fixed(_) => false,
    }
}

/// §4.4 on-demand full rescan, used by `changeParent` (parent timeout or
/// loop detection). Falls back to `sink_addr` when no candidate qualifies.
pub fn select(strategy: ParentStrategy, neighbours: &NeighbourTable, self_addr: u8, sink_addr: u8) -> u8 {
    let candidates: Vec<NeighbourEntry> = neighbours.parent_candidates().into_iter().filter(|e| e.link != LinkRole::Inbound).collect();

    match strategy {
        ParentStrategy::NextLower => candidates
            .iter()
            .filter(|e| e.addr < self_addr)
            .max_by_key(|e| e.addr)
            .map(|e| e.addr)
            .unwrap_or(sink_addr),
        ParentStrategy::Random => {
            let pool: Vec<u8> = candidates.iter().map(|e| e.addr).filter(|&a| a != sink_addr).collect();
            pick_random(&pool).unwrap_or(sink_addr)
        }
        ParentStrategy::RandomLower => {
            let pool: Vec<u8> = candidates.iter().filter(|e| e.addr < self_addr).map(|e| e.addr).collect();
            pick_random(&pool).unwrap_or(sink_addr)
        }
        ParentStrategy::Closest => candidates
            .iter()
            .fold((sink_addr, MIN_RSSI), |(addr, rssi), e| if e.rssi > rssi { (e.addr, e.rssi) } else { (addr, rssi) })
            .0,
        ParentStrategy::ClosestLower => candidates
            .iter()
            .filter(|e| e.addr < self_addr)
            .fold((sink_addr, MIN_RSSI), |(addr, rssi), e| if e.rssi >= rssi { (e.addr, e.rssi) } else { (addr, rssi) })
            .0,
        ParentStrategy::Fixed(addr) => addr,
    }
}

fn pick_random(pool: &[u8]) -> Option<u8> {
    if pool.is_empty() {
        None
    } else {
        Some(pool[rand::thread_rng().gen_range(0..pool.len())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(addr: u8, rssi: i8, link: LinkRole) -> NeighbourEntry {
        NeighbourEntry { addr, state: crate::neighbor::NodeState::Active, link, rssi, parent: 0xFF, parent_rssi: MIN_RSSI, last_seen: 0 }
    }

    #[test]
    fn next_lower_falls_back_to_sink_with_no_candidates() {
        let table = NeighbourTable::new(0x07);
        assert_eq!(select(ParentStrategy::NextLower, &table, 0x07, 0x01), 0x01);
    }

    #[test]
    fn next_lower_picks_highest_address_below_self() {
        let table = NeighbourTable::new(0x0D);
        table.observe(crate::neighbor::Observation { addr: 0x05, rssi: -50, peer_parent: 0xFF, peer_parent_rssi: MIN_RSSI, now: 0 }, 0x01);
        table.observe(crate::neighbor::Observation { addr: 0x07, rssi: -60, peer_parent: 0xFF, peer_parent_rssi: MIN_RSSI, now: 0 }, 0x01);
        assert_eq!(select(ParentStrategy::NextLower, &table, 0x0D, 0x01), 0x07);
    }

    #[test]
    fn closest_picks_strongest_rssi_candidate() {
        let table = NeighbourTable::new(0x0D);
        table.observe(crate::neighbor::Observation { addr: 0x05, rssi: -70, peer_parent: 0xFF, peer_parent_rssi: MIN_RSSI, now: 0 }, 0x01);
        table.observe(crate::neighbor::Observation { addr: 0x09, rssi: -40, peer_parent: 0xFF, peer_parent_rssi: MIN_RSSI, now: 0 }, 0x01);
        assert_eq!(select(ParentStrategy::Closest, &table, 0x0D, 0x01), 0x09);
    }

    #[test]
    fn children_are_never_candidates() {
        let table = NeighbourTable::new(0x0D);
        table.observe(crate::neighbor::Observation { addr: 0x05, rssi: -40, peer_parent: 0x0D, peer_parent_rssi: MIN_RSSI, now: 0 }, 0x01);
        assert_eq!(select(ParentStrategy::Closest, &table, 0x0D, 0x01), 0x01);
    }

    #[test]
    fn reactive_closest_requires_strict_improvement() {
        assert!(!reactive_replace(ParentStrategy::Closest, 0x0D, 0x05, -60, -60));
        assert!(reactive_replace(ParentStrategy::Closest, 0x0D, 0x05, -40, -60));
    }

    #[test]
    fn idle_link_candidates_are_eligible() {
        let e = entry(0x05, -50, LinkRole::Idle);
        assert_eq!(e.link, LinkRole::Idle);
    }
}
