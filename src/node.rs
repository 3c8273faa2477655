//! Composition root (§5): wires one concrete [`Mac`] variant, [`Strp`]
//! routing and the optional [`ProtoMon`] overlay into a single running node.
//! Grounded in `STRP.c`'s `STRP_init` (thread creation order: receive
//! worker first, sensing phase, then send and beacon/cleanup workers) and
//! the teacher's demo binaries' `main()` shape (build the stack, spawn
//! workers, run until interrupted).
//!
//! `Node` stays generic over the MAC variant exactly as [`Strp`] is —
//! `src/bin/strp_node.rs` is the one place that picks a concrete
//! `mac::{aloha,macaw,stem}` type based on [`crate::MacVariant`] and
//! monomorphises a `Node` over it.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::mac::Mac;
use crate::protomon::{MonitoredMac, MonitoredRouting, ProtoMon, ProtoMonConfig};
use crate::routing::{RoutingConfig, RoutingRecvHeader, Strp};
use crate::timer::Timer;
use crate::NodeConfig;

/// A fully wired node: MAC + STRP routing + ProtoMon, over a caller-supplied
/// concrete MAC implementation `M` and time source `T`.
///
/// The caller is responsible for constructing `mac` and calling its own
/// `.start()` before [`Node::new`] — that mirrors how every MAC variant's
/// own tests build a pair (radio first, then `mac.start()`, then whatever
/// sits on top), and keeps `Node` itself free of per-variant branching.
pub struct Node<M: Mac, T: Timer> {
    config: NodeConfig,
    routing: Arc<Strp<MonitoredMac<M, T>, T>>,
    app: Arc<MonitoredRouting<MonitoredMac<M, T>, T>>,
    protomon: Arc<ProtoMon>,
}

impl<M: Mac, T: Timer> Node<M, T> {
    pub fn new(config: NodeConfig, mac: Arc<M>, timer: T) -> Arc<Self> {
        let protomon = ProtoMon::new(ProtoMonConfig {
            enabled: config.monitoring,
            monitor_mac: config.monitoring,
            monitor_routing: config.monitoring,
            self_addr: config.addr,
            sink_addr: config.sink_addr,
            send_interval: config.report_interval,
            csv_dir: config.csv_dir.clone(),
            ..ProtoMonConfig::default()
        });
        protomon.init();

        let monitored_mac = protomon.wrap_mac(mac, timer.clone());

        let routing_config = RoutingConfig {
            self_addr: config.addr,
            sink_addr: config.sink_addr,
            strategy: config.routing_strategy,
            loop_policy: config.loop_policy,
            sense_duration: config.sense_duration,
            beacon_interval: config.beacon_interval,
            node_timeout: config.node_timeout,
            recv_poll: config.recv_poll,
        };
        let routing = Strp::new(routing_config, monitored_mac, timer.clone());
        let app = protomon.wrap_routing(routing.clone(), timer);

        Arc::new(Self { config, routing, app, protomon })
    }

    pub fn is_sink(&self) -> bool {
        self.config.is_sink()
    }

    pub fn current_parent(&self) -> u8 {
        self.routing.current_parent()
    }

    pub fn protomon(&self) -> &Arc<ProtoMon> {
        &self.protomon
    }

    /// Spawn every worker thread this node needs (§5): STRP's own threads,
    /// plus the ProtoMon reporter (non-sink) or sink dispatch (sink) if
    /// monitoring is enabled. The underlying MAC's threads are the caller's
    /// responsibility, started before [`Node::new`].
    pub fn start(self: &Arc<Self>, timer: T) -> Vec<JoinHandle<()>> {
        let mut handles = self.routing.start();
        if let Some(h) = self.protomon.start_reporter(self.routing.clone(), timer.clone()) {
            handles.push(h);
        }
        handles.extend(self.protomon.start_sink_dispatch(self.routing.clone(), timer));
        handles
    }

    /// Blocking application send (§6).
    pub fn send(&self, dest: u8, data: &[u8]) -> bool {
        self.app.send(dest, data)
    }

    pub fn isend(&self, dest: u8, data: &[u8]) -> bool {
        self.app.isend(dest, data)
    }

    pub fn recv(&self, header: &mut RoutingRecvHeader, data: &mut [u8]) -> usize {
        self.app.recv(header, data)
    }

    pub fn try_recv(&self, header: &mut RoutingRecvHeader, data: &mut [u8]) -> usize {
        self.app.try_recv(header, data)
    }

    pub fn timed_recv(&self, header: &mut RoutingRecvHeader, data: &mut [u8], timeout: Duration) -> usize {
        self.app.timed_recv(header, data, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::aloha::AlohaMac;
    use crate::mac::MacConfig;
    use crate::radio::sim::SimMedium;
    use crate::routing::{LoopPolicy, ParentStrategy};
    use crate::timer::SystemTimer;
    use crate::MacVariant;

    fn node_config(addr: u8, sink_addr: u8, monitoring: bool) -> NodeConfig {
        NodeConfig {
            addr,
            sink_addr,
            mac_variant: MacVariant::Aloha,
            mac: MacConfig::default(),
            routing_strategy: ParentStrategy::NextLower,
            loop_policy: LoopPolicy::AddressCompare,
            sense_duration: Duration::from_millis(50),
            beacon_interval: Duration::from_secs(3600),
            node_timeout: Duration::from_secs(3600),
            recv_poll: Duration::from_millis(100),
            monitoring,
            report_interval: Duration::from_secs(60),
            csv_dir: std::env::temp_dir(),
        }
    }

    #[test]
    fn node_delivers_application_datagram_to_sink() {
        let medium = SimMedium::new();

        let sink_mac = AlohaMac::new(0x01, MacConfig::default(), Arc::new(medium.tap(-40)), SystemTimer::new());
        sink_mac.start();
        let sink = Node::new(node_config(0x01, 0x01, false), sink_mac, SystemTimer::new());
        sink.start(SystemTimer::new());

        let node_mac = AlohaMac::new(0x07, MacConfig::default(), Arc::new(medium.tap(-40)), SystemTimer::new());
        node_mac.start();
        let node = Node::new(node_config(0x07, 0x01, false), node_mac, SystemTimer::new());
        node.start(SystemTimer::new());

        std::thread::sleep(Duration::from_millis(300));
        assert!(node.send(0x01, b"hello"));

        let mut header = RoutingRecvHeader::default();
        let mut buf = [0u8; 16];
        let n = sink.timed_recv(&mut header, &mut buf, Duration::from_secs(1));
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(header.src, 0x07);
    }

    #[test]
    fn node_reports_metrics_to_sink_when_monitoring_enabled() {
        let medium = SimMedium::new();

        let sink_mac = AlohaMac::new(0x01, MacConfig::default(), Arc::new(medium.tap(-40)), SystemTimer::new());
        sink_mac.start();
        let sink = Node::new(node_config(0x01, 0x01, true), sink_mac, SystemTimer::new());
        sink.start(SystemTimer::new());

        let node_mac = AlohaMac::new(0x07, MacConfig::default(), Arc::new(medium.tap(-40)), SystemTimer::new());
        node_mac.start();
        let node = Node::new(node_config(0x07, 0x01, true), node_mac, SystemTimer::new());
        node.start(SystemTimer::new());

        std::thread::sleep(Duration::from_millis(300));
        assert!(node.send(0x01, b"hello"));
        std::thread::sleep(Duration::from_millis(100));

        assert_eq!(node.protomon().routing_metrics().get(0x01).e2e_sent, 1);
    }

    /// Regression test: a legal 240-byte application datagram (§1's
    /// "≤240-byte" bound) with ProtoMon monitoring enabled must not panic
    /// the originating node's MAC send — `MAC_HEADER_LEN + MAX_PAYLOAD_LEN`
    /// undersized the MAC frame buffer for the monitoring-wrapped payload.
    #[test]
    fn node_delivers_max_size_datagram_with_monitoring_enabled() {
        let medium = SimMedium::new();

        let sink_mac = AlohaMac::new(0x01, MacConfig::default(), Arc::new(medium.tap(-40)), SystemTimer::new());
        sink_mac.start();
        let sink = Node::new(node_config(0x01, 0x01, true), sink_mac, SystemTimer::new());
        sink.start(SystemTimer::new());

        let node_mac = AlohaMac::new(0x07, MacConfig::default(), Arc::new(medium.tap(-40)), SystemTimer::new());
        node_mac.start();
        let node = Node::new(node_config(0x07, 0x01, true), node_mac, SystemTimer::new());
        node.start(SystemTimer::new());

        std::thread::sleep(Duration::from_millis(300));
        let payload = vec![0xABu8; 240];
        assert!(node.send(0x01, &payload));

        let mut header = RoutingRecvHeader::default();
        let mut buf = [0u8; 240];
        let n = sink.timed_recv(&mut header, &mut buf, Duration::from_secs(1));
        assert_eq!(n, 240);
        assert_eq!(&buf[..n], &payload[..]);
    }
}
