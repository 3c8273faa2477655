//! C4 — STRP tree routing (§4.4), grounded in `STRPAloha/STRP/STRP.c` in
//! full: tree formation over an arbitrary MAC, parent-selection strategies,
//! loop detection, store-and-forward, topology reporting.
//!
//! Threading mirrors `STRP_init`: the receive worker starts first (so beacon
//! observations land in the neighbour table while sensing runs), then
//! [`Strp::start`] blocks the caller through the sensing phase before
//! spawning the send worker and the periodic beacon/cleanup thread.

pub mod strategy;
pub mod topology;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, trace, warn};
use rand::Rng;

use crate::mac::{Mac, RecvHeader as MacRecvHeader};
use crate::neighbor::{BROADCAST_ADDR, LinkRole, NeighbourTable, Observation};
use crate::packet::{BeaconFrame, RoutingControl, RoutingHeader, ROUTING_HEADER_LEN};
use crate::queue::{BoundedQueue, DequeueOutcome};
use crate::timer::Timer;

pub use strategy::ParentStrategy;
pub use topology::TopologyReport;

const QUEUE_CAPACITY: usize = 64;
/// True worst case (§4.5): ProtoMon's monitoring prefix and path trace at
/// their largest, on top of the largest legal application datagram — see
/// `packet::MAX_ROUTING_FRAME_LEN`.
const FRAME_BUF_LEN: usize = crate::packet::MAX_ROUTING_FRAME_LEN;

/// §9 Open Question 1: which tie-breaker applies when a loop is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPolicy {
    /// Only change parent if `self_addr > prev_hop` — the original's
    /// default, which prevents two nodes oscillating a loop between them
    /// forever by letting only the higher address back off.
    AddressCompare,
    /// Always change parent on any detected loop, regardless of address.
    Always,
}

#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub self_addr: u8,
    pub sink_addr: u8,
    pub strategy: ParentStrategy,
    pub loop_policy: LoopPolicy,
    pub sense_duration: Duration,
    pub beacon_interval: Duration,
    pub node_timeout: Duration,
    /// Poll interval used by the receive worker's `mac.timed_recv` loop.
    pub recv_poll: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            self_addr: 0,
            sink_addr: 0x01,
            strategy: ParentStrategy::NextLower,
            loop_policy: LoopPolicy::AddressCompare,
            sense_duration: Duration::from_secs(10),
            beacon_interval: Duration::from_secs(30),
            node_timeout: Duration::from_secs(60),
            recv_poll: Duration::from_secs(1),
        }
    }
}

/// §6 application-facing receive header: `{src, dst, prev_hop, rssi,
/// hop_count}`. `hop_count` is always 0 here — it is purely a ProtoMon
/// artifact (§9 Open Question 2) filled in by the instrumentation overlay.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingRecvHeader {
    pub src: u8,
    pub dst: u8,
    pub prev_hop: u8,
    pub rssi: i8,
    pub hop_count: u8,
    pub ctrl: u8,
}

struct SendRequest {
    dest: u8,
    ctrl: RoutingControl,
    data: Vec<u8>,
    result: Option<mpsc::Sender<bool>>,
}

pub struct Strp<M: Mac, T: Timer> {
    config: RoutingConfig,
    mac: Arc<M>,
    timer: T,
    neighbours: NeighbourTable,
    parent: Mutex<u8>,
    loopy_parent: Mutex<Option<u8>>,
    parent_changes: AtomicUsize,
    send_queue: BoundedQueue<SendRequest>,
    recv_queue: BoundedQueue<(RoutingRecvHeader, Vec<u8>)>,
    metrics_queue: BoundedQueue<(RoutingRecvHeader, Vec<u8>)>,
    table_queue: BoundedQueue<TopologyReport>,
}

impl<M: Mac, T: Timer> Strp<M, T> {
    pub fn new(config: RoutingConfig, mac: Arc<M>, timer: T) -> Arc<Self> {
        let self_addr = config.self_addr;
        let sink_addr = config.sink_addr;
        Arc::new(Self {
            config,
            mac,
            timer,
            neighbours: NeighbourTable::new(self_addr),
            parent: Mutex::new(sink_addr),
            loopy_parent: Mutex::new(None),
            parent_changes: AtomicUsize::new(0),
            send_queue: BoundedQueue::new(QUEUE_CAPACITY),
            recv_queue: BoundedQueue::new(QUEUE_CAPACITY),
            metrics_queue: BoundedQueue::new(QUEUE_CAPACITY),
            table_queue: BoundedQueue::new(QUEUE_CAPACITY),
        })
    }

    pub fn is_sink(&self) -> bool {
        self.config.self_addr == self.config.sink_addr
    }

    pub fn current_parent(&self) -> u8 {
        *self.parent.lock().unwrap()
    }

    pub fn parent_change_count(&self) -> usize {
        self.parent_changes.load(Ordering::Relaxed)
    }

    pub fn neighbours(&self) -> &NeighbourTable {
        &self.neighbours
    }

    /// §4.4 "sensing phase" followed by spawning the persistent worker
    /// threads (§5 thread inventory: routing receive, routing send,
    /// beacon/cleanup). Blocks the caller through the sensing phase, exactly
    /// as `STRP_init` joins its sensing thread before returning.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let recv_strp = self.clone();
        let recv_handle = thread::Builder::new().name("strp-recv".into()).spawn(move || recv_strp.recv_worker()).expect("failed to spawn STRP receive thread");

        let mut handles = vec![recv_handle];

        if !self.is_sink() {
            self.sense();

            let send_strp = self.clone();
            let send_handle =
                thread::Builder::new().name("strp-send".into()).spawn(move || send_strp.send_worker()).expect("failed to spawn STRP send thread");
            handles.push(send_handle);
        }

        let beacon_strp = self.clone();
        let beacon_handle =
            thread::Builder::new().name("strp-beacon".into()).spawn(move || beacon_strp.beacon_thread()).expect("failed to spawn STRP beacon thread");
        handles.push(beacon_handle);

        handles
    }

    /// §4.4 sensing phase: broadcast beacons at randomised sub-second
    /// intervals for `sense_duration`, repeating until at least one
    /// neighbour has been observed. The concurrently-running receive worker
    /// is what actually populates the neighbour table from peers' beacons.
    fn sense(&self) {
        loop {
            let deadline = self.timer.deadline_in(self.config.sense_duration);
            while !self.timer.has_passed(deadline) {
                self.send_beacon();
                let jitter_ms = rand::thread_rng().gen_range(500..=1200);
                self.timer.sleep(Duration::from_millis(jitter_ms));
            }
            if self.neighbours.num_known() > 0 {
                break;
            }
            debug!("sensing phase ended with no neighbours observed, repeating");
        }
        info!("sensing complete, {} neighbour(s) known, parent {:#04x}", self.neighbours.num_known(), self.current_parent());
    }

    fn send_beacon(&self) {
        let beacon = BeaconFrame { parent: self.current_parent(), parent_rssi: self.neighbours.get(self.current_parent()).map(|e| e.rssi).unwrap_or(strategy::MIN_RSSI) };
        let mut payload = [0u8; BeaconFrame::LEN];
        beacon.encode(&mut payload);

        let header = RoutingHeader { ctrl: RoutingControl::Beacon, dst: BROADCAST_ADDR, src: self.config.self_addr, parent: self.current_parent(), num_hops: 0, len: 0 };
        let mut buf = [0u8; FRAME_BUF_LEN];
        let n = header.encode(&payload, &mut buf);
        self.mac.isend(BROADCAST_ADDR, &buf[..n]);
    }

    /// §4.4 periodic beacon + neighbour cleanup, one thread for both (§9
    /// Open Question 3).
    fn beacon_thread(&self) {
        loop {
            self.timer.sleep(self.config.beacon_interval);
            self.send_beacon();

            let now = self.timer.now_ms();
            let timed_out_parent = self.neighbours.cleanup(now, self.config.node_timeout.as_millis() as u64, self.current_parent());
            if timed_out_parent.is_some() && !self.is_sink() {
                warn!("parent {:#04x} timed out, selecting a new one", self.current_parent());
                self.change_parent();
            }
        }
    }

    fn send_worker(&self) {
        loop {
            let req = self.send_queue.dequeue();
            let parent = self.current_parent();
            let header = RoutingHeader { ctrl: req.ctrl, dst: req.dest, src: self.config.self_addr, parent, num_hops: 0, len: 0 };
            let mut buf = vec![0u8; ROUTING_HEADER_LEN + req.data.len()];
            let n = header.encode(&req.data, &mut buf);
            let success = self.mac.send(parent, &buf[..n]);
            if let Some(tx) = req.result {
                let _ = tx.send(success);
            }
        }
    }

    fn recv_worker(&self) {
        let mut mac_header = MacRecvHeader::default();
        let mut buf = [0u8; FRAME_BUF_LEN];
        loop {
            let n = self.mac.timed_recv(&mut mac_header, &mut buf, self.config.recv_poll);
            if n == 0 {
                continue;
            }
            let (header, payload) = match RoutingHeader::decode::<()>(&buf[..n]) {
                Ok(v) => v,
                Err(e) => {
                    debug!("dropping unparseable routing frame: {:?}", e);
                    continue;
                }
            };

            self.neighbours.observe(
                Observation { addr: mac_header.src, rssi: mac_header.rssi, peer_parent: BROADCAST_ADDR, peer_parent_rssi: strategy::MIN_RSSI, now: self.timer.now_ms() },
                self.current_parent(),
            );

            match header.ctrl {
                RoutingControl::Beacon => self.handle_beacon(mac_header.src, mac_header.rssi, payload),
                RoutingControl::Topology => self.deliver_or_forward(header, mac_header, payload, Dest::Table),
                RoutingControl::Data => self.deliver_or_forward(header, mac_header, payload, Dest::App),
                RoutingControl::MacMetrics | RoutingControl::RoutingMetrics => self.deliver_or_forward(header, mac_header, payload, Dest::Metrics),
            }
        }
    }

    fn handle_beacon(&self, src: u8, rssi: i8, payload: &[u8]) {
        let beacon = match BeaconFrame::decode::<()>(payload) {
            Ok(b) => b,
            Err(e) => {
                debug!("bad beacon from {:#04x}: {:?}", src, e);
                return;
            }
        };

        self.neighbours.observe(Observation { addr: src, rssi, peer_parent: beacon.parent, peer_parent_rssi: beacon.parent_rssi, now: self.timer.now_ms() }, self.current_parent());

        if self.is_sink() || src == self.current_parent() {
            return;
        }
        if self.neighbours.get(src).map(|e| e.link) == Some(LinkRole::Inbound) {
            return;
        }

        let current_rssi = self.neighbours.get(self.current_parent()).map(|e| e.rssi).unwrap_or(strategy::MIN_RSSI);
        if strategy::reactive_replace(self.config.strategy, self.config.self_addr, src, rssi, current_rssi) {
            self.set_parent(src);
        }
    }

    fn set_parent(&self, new_parent: u8) {
        let mut parent = self.parent.lock().unwrap();
        if *parent == new_parent {
            return;
        }
        let prev = *parent;
        *parent = new_parent;
        drop(parent);

        self.neighbours.set_link(prev, LinkRole::Idle);
        self.neighbours.set_link(new_parent, LinkRole::Outbound);
        self.parent_changes.fetch_add(1, Ordering::Relaxed);
        info!("parent changed {:#04x} -> {:#04x}", prev, new_parent);
        self.send_beacon();
    }

    /// On-demand full rescan (§4.4), used on parent timeout or loop
    /// detection — distinct from the reactive per-beacon check in
    /// [`Self::handle_beacon`].
    fn change_parent(&self) {
        let new_parent = strategy::select(self.config.strategy, &self.neighbours, self.config.self_addr, self.config.sink_addr);
        self.set_parent(new_parent);
    }

    /// §4.4 loop detection: a frame whose originator is this node means it
    /// travelled all the way around a cycle and came back. Suppresses
    /// repeated reactions to the same offending neighbour until a different
    /// one triggers it, mirroring `STRP.c`'s single `loopyParent` slot.
    fn check_loop(&self, originator: u8, prev_hop: u8) -> bool {
        if originator != self.config.self_addr {
            return false;
        }
        let mut loopy = self.loopy_parent.lock().unwrap();
        if *loopy == Some(prev_hop) {
            return false;
        }
        *loopy = Some(prev_hop);
        true
    }

    fn deliver_or_forward(&self, header: RoutingHeader, mac_header: MacRecvHeader, payload: &[u8], dest: Dest) {
        let is_for_me = header.dst == self.config.self_addr || header.dst == BROADCAST_ADDR;

        if self.check_loop(header.src, mac_header.src) {
            warn!("loop detected via {:#04x} (originator {:#04x})", mac_header.src, header.src);
            match self.config.loop_policy {
                LoopPolicy::AddressCompare if self.config.self_addr > mac_header.src => self.change_parent(),
                LoopPolicy::Always => self.change_parent(),
                _ => {}
            }
        }

        if is_for_me {
            let recv_header = RoutingRecvHeader { src: header.src, dst: header.dst, prev_hop: mac_header.src, rssi: mac_header.rssi, hop_count: 0, ctrl: header.ctrl as u8 };
            match dest {
                Dest::App => {
                    if self.recv_queue.try_enqueue((recv_header, payload.to_vec())).is_err() {
                        warn!("routing receive queue full, dropping datagram from {:#04x}", header.src);
                    }
                }
                Dest::Metrics => {
                    if self.metrics_queue.try_enqueue((recv_header, payload.to_vec())).is_err() {
                        warn!("routing metrics queue full, dropping report from {:#04x}", header.src);
                    }
                }
                Dest::Table => match TopologyReport::decode::<()>(header.src, payload) {
                    Ok(report) => {
                        if self.table_queue.try_enqueue(report).is_err() {
                            warn!("topology queue full, dropping report from {:#04x}", header.src);
                        }
                    }
                    Err(e) => debug!("bad topology report from {:#04x}: {:?}", header.src, e),
                },
            }
            return;
        }

        if header.dst == BROADCAST_ADDR {
            return;
        }

        trace!("forwarding {:?} from {:#04x} towards {:#04x} via parent {:#04x}", header.ctrl, header.src, header.dst, self.current_parent());
        let parent = self.current_parent();
        let fwd_header = RoutingHeader { ctrl: header.ctrl, dst: header.dst, src: header.src, parent, num_hops: header.num_hops + 1, len: header.len };
        let mut buf = vec![0u8; ROUTING_HEADER_LEN + payload.len()];
        let n = fwd_header.encode(payload, &mut buf);
        if !self.mac.isend(parent, &buf[..n]) {
            warn!("failed to forward frame from {:#04x} to {:#04x}", header.src, header.dst);
        }
    }

    /// Blocking application send (§6): `ctrl = RoutingControl::Data`.
    pub fn send(&self, dest: u8, data: &[u8]) -> bool {
        self.send_tagged(dest, RoutingControl::Data, data)
    }

    /// Send with an explicit control byte, bypassing the public `send`/`recv`
    /// framing. Used internally for beacon/topology traffic and by ProtoMon
    /// to deliver its own metric reports without recursing into the
    /// monitoring overlay (§4.5).
    pub fn send_tagged(&self, dest: u8, ctrl: RoutingControl, data: &[u8]) -> bool {
        let (tx, rx) = mpsc::channel();
        self.send_queue.enqueue(SendRequest { dest, ctrl, data: data.to_vec(), result: Some(tx) });
        rx.recv().unwrap_or(false)
    }

    pub fn isend(&self, dest: u8, data: &[u8]) -> bool {
        self.send_queue.try_enqueue(SendRequest { dest, ctrl: RoutingControl::Data, data: data.to_vec(), result: None }).is_ok()
    }

    pub fn recv(&self, header: &mut RoutingRecvHeader, data: &mut [u8]) -> usize {
        let (h, payload) = self.recv_queue.dequeue();
        copy_payload(h, payload, header, data)
    }

    pub fn try_recv(&self, header: &mut RoutingRecvHeader, data: &mut [u8]) -> usize {
        match self.recv_queue.try_dequeue() {
            Some((h, payload)) => copy_payload(h, payload, header, data),
            None => 0,
        }
    }

    pub fn timed_recv(&self, header: &mut RoutingRecvHeader, data: &mut [u8], timeout: Duration) -> usize {
        match self.recv_queue.timed_dequeue_for(timeout) {
            DequeueOutcome::Item((h, payload)) => copy_payload(h, payload, header, data),
            DequeueOutcome::TimedOut => 0,
        }
    }

    /// Sink-side: block for the next delivered metrics report (§4.5).
    pub fn recv_metrics(&self, header: &mut RoutingRecvHeader, data: &mut [u8]) -> usize {
        let (h, payload) = self.metrics_queue.dequeue();
        copy_payload(h, payload, header, data)
    }

    /// Sink-side: block for the next pushed or pulled topology report (§9
    /// Open Question 4: both push and pull funnel through this one queue).
    pub fn recv_routing_table(&self) -> TopologyReport {
        self.table_queue.dequeue()
    }

    pub fn timed_recv_routing_table(&self, timeout: Duration) -> Option<TopologyReport> {
        match self.table_queue.timed_dequeue_for(timeout) {
            DequeueOutcome::Item(report) => Some(report),
            DequeueOutcome::TimedOut => None,
        }
    }

    /// Enqueue this node's own topology report towards the sink, used both
    /// by the periodic push and by a pull request handler (§4.4, §9 Open
    /// Question 4).
    pub fn send_routing_table(&self) -> bool {
        let report = TopologyReport::from_neighbours(self.config.self_addr, &self.neighbours.snapshot());
        self.send_tagged(self.config.sink_addr, RoutingControl::Topology, &report.encode())
    }
}

enum Dest {
    App,
    Metrics,
    Table,
}

fn copy_payload(h: RoutingRecvHeader, payload: Vec<u8>, header: &mut RoutingRecvHeader, data: &mut [u8]) -> usize {
    *header = h;
    let n = payload.len().min(data.len());
    data[..n].copy_from_slice(&payload[..n]);
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::aloha::AlohaMac;
    use crate::mac::MacConfig;
    use crate::radio::sim::SimMedium;
    use crate::timer::SystemTimer;

    fn config(self_addr: u8, sink_addr: u8) -> RoutingConfig {
        RoutingConfig {
            self_addr,
            sink_addr,
            sense_duration: Duration::from_millis(50),
            beacon_interval: Duration::from_secs(3600),
            node_timeout: Duration::from_secs(3600),
            recv_poll: Duration::from_millis(100),
            ..RoutingConfig::default()
        }
    }

    fn make_pair() -> (Arc<Strp<AlohaMac<crate::radio::sim::SimulatedRadio, SystemTimer>, SystemTimer>>, Arc<Strp<AlohaMac<crate::radio::sim::SimulatedRadio, SystemTimer>, SystemTimer>>) {
        let medium = SimMedium::new();
        let sink_mac = AlohaMac::new(0x01, MacConfig::default(), Arc::new(medium.tap(-40)), SystemTimer::new());
        let node_mac = AlohaMac::new(0x07, MacConfig::default(), Arc::new(medium.tap(-40)), SystemTimer::new());
        sink_mac.start();
        node_mac.start();

        let sink = Strp::new(config(0x01, 0x01), sink_mac, SystemTimer::new());
        let node = Strp::new(config(0x07, 0x01), node_mac, SystemTimer::new());
        sink.start();
        node.start();
        std::thread::sleep(Duration::from_millis(300));
        (sink, node)
    }

    #[test]
    fn node_discovers_sink_as_parent_during_sensing() {
        let (_sink, node) = make_pair();
        assert_eq!(node.current_parent(), 0x01);
        assert!(node.neighbours.num_known() >= 1);
    }

    #[test]
    fn unicast_datagram_is_delivered_to_sink() {
        let (sink, node) = make_pair();
        assert!(node.send(0x01, b"hello"));

        let mut header = RoutingRecvHeader::default();
        let mut buf = [0u8; 16];
        let n = sink.timed_recv(&mut header, &mut buf, Duration::from_secs(1));
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(header.src, 0x07);
    }

    #[test]
    fn topology_report_reaches_sink_table_queue() {
        let (sink, node) = make_pair();
        assert!(node.send_routing_table());
        let report = sink.recv_routing_table();
        assert_eq!(report.reporter, 0x07);
    }

    #[test]
    fn loop_detection_suppresses_repeat_from_same_neighbour() {
        let (_sink, node) = make_pair();
        assert!(node.check_loop(0x07, 0x09));
        assert!(!node.check_loop(0x07, 0x09));
        assert!(node.check_loop(0x07, 0x0B));
    }
}
