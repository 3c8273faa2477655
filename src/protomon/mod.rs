//! C5 — ProtoMon instrumentation overlay (§4.5), grounded in
//! `STRP_Aloha/ProtoMon/ProtoMon.c`: wraps the MAC and routing layers with
//! decorator values rather than touching their internals (§9 design note),
//! so a [`node::Node`](crate::node::Node) is built identically whether or
//! not monitoring is enabled — only the config's `enabled`/`monitor_mac`/
//! `monitor_routing` flags change behaviour.
//!
//! Two wrapping points mirror the source's two wrapper families:
//! - [`MonitoredMac`] sits where `ProtoMon_MAC_send`/`ProtoMon_MAC_recv`
//!   sit: every physical hop gets an 8-byte send timestamp prepended, and
//!   (if routing monitoring is also on) the datagram's path trace is grown
//!   by one hop, regardless of whether this node ends up delivering or
//!   forwarding the frame.
//! - [`MonitoredRouting`] sits where `ProtoMon_Routing_sendMsg`/
//!   `ProtoMon_Routing_recvMsg` sit: the originating node's own address
//!   becomes the first path token and an end-to-end send timestamp is
//!   attached; the final receiver computes end-to-end latency and records
//!   the completed path.

pub mod csv_sink;
pub mod metrics;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use crate::mac::{Mac, RecvHeader};
use crate::neighbor::BROADCAST_ADDR;
use crate::packet::{MonitorHeader, RoutingControl, ROUTING_HEADER_LEN};
use crate::routing::{RoutingRecvHeader, Strp};
use crate::timer::Timer;

pub use csv_sink::CsvSink;
pub use metrics::{MacMetrics, MacPeerMetric, RoutingMetrics, RoutingPeerMetric};

const MAC_TIMESTAMP_LEN: usize = 8;
/// Scratch buffer ProtoMon's wrappers hand to the inner Mac/Routing `recv`
/// as the destination to decode into before re-wrapping for the caller.
/// Sized to the true worst case (§4.5: a 240-byte application datagram plus
/// the monitoring prefix and path trace at their largest), the same bound
/// every MAC variant's own frame buffers use — see `packet::MAX_ROUTING_FRAME_LEN`.
const SCRATCH_LEN: usize = crate::packet::MAX_ROUTING_FRAME_LEN;

#[derive(Debug, Clone)]
pub struct ProtoMonConfig {
    pub enabled: bool,
    pub monitor_mac: bool,
    pub monitor_routing: bool,
    pub self_addr: u8,
    pub sink_addr: u8,
    /// How often the reporter thread sends a fresh pair of reports (§4.5).
    pub send_interval: Duration,
    /// Wait before the very first report, letting the tree settle.
    pub initial_send_wait: Duration,
    /// Gap between a node's MAC report and its routing report, so the two
    /// don't contend for the same send queue slot back to back.
    pub send_delay: Duration,
    /// Minimum gap between visualisation triggers on the sink (§6; the
    /// visualisation pipeline itself is out of scope, see spec Non-goals).
    pub viz_interval: Duration,
    pub csv_dir: PathBuf,
}

impl Default for ProtoMonConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            monitor_mac: true,
            monitor_routing: true,
            self_addr: 0,
            sink_addr: 0x01,
            send_interval: Duration::from_secs(60),
            initial_send_wait: Duration::from_secs(30),
            send_delay: Duration::from_secs(1),
            viz_interval: Duration::from_secs(10),
            csv_dir: PathBuf::from("."),
        }
    }
}

/// Facade over the instrumentation overlay: owns the metric tables, hands
/// out decorator values for the MAC and routing layers, and spawns the
/// reporter (non-sink) or sink-dispatch (sink) threads.
pub struct ProtoMon {
    initialized: AtomicBool,
    config: Arc<ProtoMonConfig>,
    mac_metrics: Arc<MacMetrics>,
    routing_metrics: Arc<RoutingMetrics>,
    last_viz: AtomicU64,
}

impl ProtoMon {
    pub fn new(config: ProtoMonConfig) -> Arc<Self> {
        Arc::new(Self {
            initialized: AtomicBool::new(false),
            config: Arc::new(config),
            mac_metrics: Arc::new(MacMetrics::new()),
            routing_metrics: Arc::new(RoutingMetrics::new()),
            last_viz: AtomicU64::new(0),
        })
    }

    /// `true` the first time this instance is initialised, `false` on every
    /// later call — mirrors `ProtoMon_init`'s static `initialized` guard
    /// (§8 test S6), even though building a fresh decorator per `Node` makes
    /// re-initialisation harmless here.
    pub fn init(&self) -> bool {
        self.initialized.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    pub fn is_sink(&self) -> bool {
        self.config.self_addr == self.config.sink_addr
    }

    pub fn mac_metrics(&self) -> &Arc<MacMetrics> {
        &self.mac_metrics
    }

    pub fn routing_metrics(&self) -> &Arc<RoutingMetrics> {
        &self.routing_metrics
    }

    pub fn wrap_mac<M: Mac, T: Timer>(&self, inner: Arc<M>, timer: T) -> Arc<MonitoredMac<M, T>> {
        Arc::new(MonitoredMac {
            inner,
            timer,
            self_addr: self.config.self_addr,
            config: self.config.clone(),
            mac_metrics: self.mac_metrics.clone(),
        })
    }

    pub fn wrap_routing<M: Mac, T: Timer>(&self, inner: Arc<Strp<M, T>>, timer: T) -> Arc<MonitoredRouting<M, T>> {
        Arc::new(MonitoredRouting { inner, timer, config: self.config.clone(), routing_metrics: self.routing_metrics.clone() })
    }

    /// Non-sink nodes only: periodically drain and send the accumulated
    /// metric tables, then push a topology report (§4.5, §9 Open Question
    /// 4). Returns `None` on the sink, or when monitoring is disabled.
    pub fn start_reporter<M: Mac, T: Timer>(self: &Arc<Self>, strp: Arc<Strp<M, T>>, timer: T) -> Option<JoinHandle<()>> {
        if !self.config.enabled || self.is_sink() {
            return None;
        }
        let protomon = self.clone();
        Some(
            thread::Builder::new()
                .name("protomon-report".into())
                .spawn(move || protomon.reporter_loop(strp, timer))
                .expect("failed to spawn ProtoMon reporter thread"),
        )
    }

    fn reporter_loop<M: Mac, T: Timer>(&self, strp: Arc<Strp<M, T>>, timer: T) {
        timer.sleep(self.config.initial_send_wait);
        loop {
            if self.config.monitor_mac {
                let rows = self.mac_metrics.snapshot(|m| m.sent > 0 || m.received > 0);
                if !rows.is_empty() {
                    let bytes = metrics::encode_mac_report(&rows);
                    if strp.send_tagged(self.config.sink_addr, RoutingControl::MacMetrics, &bytes) {
                        self.mac_metrics.clear();
                    }
                }
                timer.sleep(self.config.send_delay);
            }
            if self.config.monitor_routing {
                let rows = self.routing_metrics.snapshot(|m| m.e2e_sent > 0 || m.e2e_received > 0);
                if !rows.is_empty() {
                    let bytes = metrics::encode_routing_report(&rows);
                    if strp.send_tagged(self.config.sink_addr, RoutingControl::RoutingMetrics, &bytes) {
                        self.routing_metrics.clear();
                    }
                }
                timer.sleep(self.config.send_delay);
            }
            strp.send_routing_table();
            timer.sleep(self.config.send_interval);
        }
    }

    /// Sink only: consume metric reports and topology reports pushed by the
    /// rest of the network and persist them as CSV rows. Returns two
    /// threads (one per queue, §4.4's push+pull topology design means the
    /// table queue already interleaves both sources).
    pub fn start_sink_dispatch<M: Mac, T: Timer>(self: &Arc<Self>, strp: Arc<Strp<M, T>>, timer: T) -> Vec<JoinHandle<()>> {
        if !self.config.enabled || !self.is_sink() {
            return Vec::new();
        }
        let sink = Arc::new(CsvSink::new(&self.config.csv_dir));

        let metrics_protomon = self.clone();
        let metrics_strp = strp.clone();
        let metrics_sink = sink.clone();
        let metrics_timer = timer.clone();
        let metrics_handle = thread::Builder::new()
            .name("protomon-sink-metrics".into())
            .spawn(move || metrics_protomon.metrics_dispatch_loop(metrics_strp, metrics_sink, metrics_timer))
            .expect("failed to spawn ProtoMon sink metrics thread");

        let topology_protomon = self.clone();
        let topology_handle = thread::Builder::new()
            .name("protomon-sink-topology".into())
            .spawn(move || topology_protomon.topology_dispatch_loop(strp, sink, timer))
            .expect("failed to spawn ProtoMon sink topology thread");

        vec![metrics_handle, topology_handle]
    }

    fn metrics_dispatch_loop<M: Mac, T: Timer>(&self, strp: Arc<Strp<M, T>>, sink: Arc<CsvSink>, timer: T) {
        loop {
            let mut header = RoutingRecvHeader::default();
            let mut buf = vec![0u8; SCRATCH_LEN];
            let n = strp.recv_metrics(&mut header, &mut buf);
            if n == 0 {
                continue;
            }
            let now = timer.now_ms();
            match RoutingControl::from_byte(header.ctrl) {
                Some(RoutingControl::MacMetrics) => match metrics::decode_mac_report::<()>(&buf[..n]) {
                    Ok(rows) => {
                        for (addr, row) in rows {
                            sink.append_mac_row(now, header.src, addr, &row);
                        }
                        self.maybe_trigger_viz(now);
                    }
                    Err(e) => warn!("bad mac metrics report from {:#04x}: {:?}", header.src, e),
                },
                Some(RoutingControl::RoutingMetrics) => match metrics::decode_routing_report::<()>(&buf[..n]) {
                    Ok(rows) => {
                        for (addr, row) in rows {
                            sink.append_routing_row(now, header.src, addr, &row);
                        }
                        self.maybe_trigger_viz(now);
                    }
                    Err(e) => warn!("bad routing metrics report from {:#04x}: {:?}", header.src, e),
                },
                _ => {}
            }
        }
    }

    fn topology_dispatch_loop<M: Mac, T: Timer>(&self, strp: Arc<Strp<M, T>>, sink: Arc<CsvSink>, timer: T) {
        loop {
            let report = strp.recv_routing_table();
            let now = timer.now_ms();
            sink.append_network_report(now, &report);
            self.maybe_trigger_viz(now);
        }
    }

    /// Rate-limited hook for the out-of-scope visualisation pipeline (spec
    /// Non-goals): logs at most once per `viz_interval` rather than calling
    /// out to anything, since the pipeline itself is never built here.
    fn maybe_trigger_viz(&self, now_ms: u64) {
        let last = self.last_viz.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < self.config.viz_interval.as_millis() as u64 {
            return;
        }
        if self.last_viz.compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed).is_ok() {
            log::info!("network state updated, visualisation pipeline would refresh from {}", self.config.csv_dir.display());
        }
    }
}

/// Decorator over a concrete [`Mac`] implementation (§4.5). Passthrough when
/// `monitor_mac` is off, so `Node` can hold the same `Arc<MonitoredMac<..>>`
/// type in both monitored and unmonitored configurations.
pub struct MonitoredMac<M: Mac, T: Timer> {
    inner: Arc<M>,
    timer: T,
    self_addr: u8,
    config: Arc<ProtoMonConfig>,
    mac_metrics: Arc<MacMetrics>,
}

impl<M: Mac, T: Timer> MonitoredMac<M, T> {
    fn wrap_outgoing(&self, dest: u8, data: &[u8]) -> Vec<u8> {
        if !self.config.monitor_mac {
            return data.to_vec();
        }
        self.mac_metrics.with_mut(dest, |m| {
            m.sent += 1;
            if dest == BROADCAST_ADDR {
                m.broadcast_count += 1;
            }
        });
        let mut buf = Vec::with_capacity(MAC_TIMESTAMP_LEN + data.len());
        let mut ts = [0u8; MAC_TIMESTAMP_LEN];
        LittleEndian::write_u64(&mut ts, self.timer.now_ms());
        buf.extend_from_slice(&ts);
        buf.extend_from_slice(data);
        buf
    }

    fn finish_incoming(&self, header: &RecvHeader, raw: &[u8], out: &mut [u8]) -> usize {
        if !self.config.monitor_mac || raw.len() < MAC_TIMESTAMP_LEN {
            let n = raw.len().min(out.len());
            out[..n].copy_from_slice(&raw[..n]);
            return n;
        }

        let send_ts = LittleEndian::read_u64(&raw[..MAC_TIMESTAMP_LEN]);
        let latency = self.timer.now_ms().saturating_sub(send_ts);
        self.mac_metrics.with_mut(header.src, |m| {
            m.received += 1;
            m.cumulative_latency_ms += latency;
        });

        let mut body = raw[MAC_TIMESTAMP_LEN..].to_vec();
        if self.config.monitor_routing {
            bump_hop_count(&mut body, self.self_addr);
        }

        let n = body.len().min(out.len());
        out[..n].copy_from_slice(&body[..n]);
        n
    }
}

/// Increments the ProtoMon hop count in place and appends this node's own
/// path token, only for `RoutingControl::Data` frames carrying a
/// [`MonitorHeader`] (beacons/topology/metric reports never do). Updates the
/// routing header's declared length in step, since the frame just grew by
/// the path token's length.
fn bump_hop_count(body: &mut Vec<u8>, self_addr: u8) {
    if body.len() < ROUTING_HEADER_LEN + MonitorHeader::LEN || body[0] != RoutingControl::Data as u8 {
        return;
    }
    let declared_len = LittleEndian::read_u16(&body[6..8]) as usize;
    if ROUTING_HEADER_LEN + declared_len > body.len() {
        return;
    }
    let old_hop_count = body[ROUTING_HEADER_LEN];
    body[ROUTING_HEADER_LEN] = old_hop_count.wrapping_add(1);

    let token = format!("{}{:02X}", crate::packet::PATH_SEPARATOR, self_addr);
    body.extend_from_slice(token.as_bytes());
    let new_len = declared_len + token.len();
    LittleEndian::write_u16(&mut body[6..8], new_len as u16);
}

impl<M: Mac, T: Timer> Mac for MonitoredMac<M, T> {
    fn send(&self, dest: u8, data: &[u8]) -> bool {
        let wrapped = self.wrap_outgoing(dest, data);
        self.inner.send(dest, &wrapped)
    }

    fn isend(&self, dest: u8, data: &[u8]) -> bool {
        let wrapped = self.wrap_outgoing(dest, data);
        self.inner.isend(dest, &wrapped)
    }

    fn recv(&self, header: &mut RecvHeader, data: &mut [u8]) -> usize {
        let mut scratch = vec![0u8; SCRATCH_LEN];
        let n = self.inner.recv(header, &mut scratch);
        if n == 0 {
            return 0;
        }
        self.finish_incoming(header, &scratch[..n], data)
    }

    fn try_recv(&self, header: &mut RecvHeader, data: &mut [u8]) -> usize {
        let mut scratch = vec![0u8; SCRATCH_LEN];
        let n = self.inner.try_recv(header, &mut scratch);
        if n == 0 {
            return 0;
        }
        self.finish_incoming(header, &scratch[..n], data)
    }

    fn timed_recv(&self, header: &mut RecvHeader, data: &mut [u8], timeout: Duration) -> usize {
        let mut scratch = vec![0u8; SCRATCH_LEN];
        let n = self.inner.timed_recv(header, &mut scratch, timeout);
        if n == 0 {
            return 0;
        }
        self.finish_incoming(header, &scratch[..n], data)
    }
}

/// Decorator over [`Strp`] that prefixes application datagrams with a
/// [`MonitorHeader`] and the originating node's path token, and unwraps the
/// same on delivery, recording end-to-end [`RoutingPeerMetric`]s (§4.5).
/// Passthrough when `monitor_routing` is off.
pub struct MonitoredRouting<M: Mac, T: Timer> {
    inner: Arc<Strp<M, T>>,
    timer: T,
    config: Arc<ProtoMonConfig>,
    routing_metrics: Arc<RoutingMetrics>,
}

impl<M: Mac, T: Timer> MonitoredRouting<M, T> {
    fn wrap_outgoing(&self, dest: u8, data: &[u8]) -> Vec<u8> {
        self.routing_metrics.with_mut(dest, |m| m.e2e_sent += 1);
        let header = MonitorHeader { hop_count: 0, send_timestamp: self.timer.now_ms() };
        let mut payload = vec![0u8; MonitorHeader::LEN];
        header.encode(&mut payload);
        payload.extend_from_slice(data);
        payload.extend_from_slice(format!("{:02X}", self.config.self_addr).as_bytes());
        payload
    }

    fn finish_incoming(&self, header: &mut RoutingRecvHeader, raw: &[u8], out: &mut [u8]) -> usize {
        if raw.len() < MonitorHeader::LEN {
            let n = raw.len().min(out.len());
            out[..n].copy_from_slice(&raw[..n]);
            return n;
        }
        let monitor = match MonitorHeader::decode::<()>(raw) {
            Ok(v) => v,
            Err(_) => {
                let n = raw.len().min(out.len());
                out[..n].copy_from_slice(&raw[..n]);
                return n;
            }
        };
        let path_len = 3 * monitor.hop_count as usize + 2;
        if raw.len() < MonitorHeader::LEN + path_len {
            let n = raw.len().min(out.len());
            out[..n].copy_from_slice(&raw[..n]);
            return n;
        }

        let app_end = raw.len() - path_len;
        let app_data = &raw[MonitorHeader::LEN..app_end];
        let path = String::from_utf8_lossy(&raw[app_end..]).into_owned();
        let latency = self.timer.now_ms().saturating_sub(monitor.send_timestamp);

        header.hop_count = monitor.hop_count;
        self.routing_metrics.with_mut(header.src, |m| {
            m.e2e_received += 1;
            m.last_hop_count = monitor.hop_count;
            m.cumulative_latency_ms += latency;
            m.path = path.clone();
        });

        let n = app_data.len().min(out.len());
        out[..n].copy_from_slice(&app_data[..n]);
        n
    }

    pub fn is_sink(&self) -> bool {
        self.inner.is_sink()
    }

    pub fn current_parent(&self) -> u8 {
        self.inner.current_parent()
    }

    pub fn send(&self, dest: u8, data: &[u8]) -> bool {
        if !self.config.monitor_routing {
            return self.inner.send(dest, data);
        }
        let payload = self.wrap_outgoing(dest, data);
        self.inner.send(dest, &payload)
    }

    pub fn isend(&self, dest: u8, data: &[u8]) -> bool {
        if !self.config.monitor_routing {
            return self.inner.isend(dest, data);
        }
        let payload = self.wrap_outgoing(dest, data);
        self.inner.isend(dest, &payload)
    }

    pub fn recv(&self, header: &mut RoutingRecvHeader, data: &mut [u8]) -> usize {
        if !self.config.monitor_routing {
            return self.inner.recv(header, data);
        }
        let mut scratch = vec![0u8; SCRATCH_LEN];
        let n = self.inner.recv(header, &mut scratch);
        if n == 0 {
            return 0;
        }
        self.finish_incoming(header, &scratch[..n], data)
    }

    pub fn try_recv(&self, header: &mut RoutingRecvHeader, data: &mut [u8]) -> usize {
        if !self.config.monitor_routing {
            return self.inner.try_recv(header, data);
        }
        let mut scratch = vec![0u8; SCRATCH_LEN];
        let n = self.inner.try_recv(header, &mut scratch);
        if n == 0 {
            return 0;
        }
        self.finish_incoming(header, &scratch[..n], data)
    }

    pub fn timed_recv(&self, header: &mut RoutingRecvHeader, data: &mut [u8], timeout: Duration) -> usize {
        if !self.config.monitor_routing {
            return self.inner.timed_recv(header, data, timeout);
        }
        let mut scratch = vec![0u8; SCRATCH_LEN];
        let n = self.inner.timed_recv(header, &mut scratch, timeout);
        if n == 0 {
            return 0;
        }
        self.finish_incoming(header, &scratch[..n], data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::aloha::AlohaMac;
    use crate::mac::MacConfig;
    use crate::radio::sim::SimMedium;
    use crate::routing::RoutingConfig;
    use crate::timer::SystemTimer;
    use std::time::Duration as StdDuration;

    #[test]
    fn init_is_idempotent() {
        let protomon = ProtoMon::new(ProtoMonConfig::default());
        assert!(protomon.init());
        assert!(!protomon.init());
        assert!(!protomon.init());
    }

    #[test]
    fn bump_hop_count_ignores_non_data_frames() {
        let mut body = vec![RoutingControl::Beacon as u8, 0, 0, 0, 0, 0, 0, 0];
        let before = body.clone();
        bump_hop_count(&mut body, 0x0D);
        assert_eq!(body, before);
    }

    #[test]
    fn bump_hop_count_grows_path_and_len_field() {
        let monitor = MonitorHeader { hop_count: 0, send_timestamp: 42 };
        let mut monitor_buf = [0u8; MonitorHeader::LEN];
        monitor.encode(&mut monitor_buf);
        let mut app_and_path = monitor_buf.to_vec();
        app_and_path.extend_from_slice(b"hi");
        app_and_path.extend_from_slice(b"07");

        let mut body = vec![0u8; ROUTING_HEADER_LEN];
        body[0] = RoutingControl::Data as u8;
        LittleEndian::write_u16(&mut body[6..8], app_and_path.len() as u16);
        body.extend_from_slice(&app_and_path);

        bump_hop_count(&mut body, 0x0D);

        assert_eq!(body[ROUTING_HEADER_LEN], 1);
        let new_len = LittleEndian::read_u16(&body[6..8]) as usize;
        assert_eq!(new_len, app_and_path.len() + 3);
        assert!(body.ends_with(b"-0D"));
    }

    type TestStrp = Strp<MonitoredMac<AlohaMac<crate::radio::sim::SimulatedRadio, SystemTimer>, SystemTimer>, SystemTimer>;

    fn routing_config(self_addr: u8, sink_addr: u8) -> RoutingConfig {
        RoutingConfig {
            self_addr,
            sink_addr,
            sense_duration: StdDuration::from_millis(50),
            beacon_interval: StdDuration::from_secs(3600),
            node_timeout: StdDuration::from_secs(3600),
            recv_poll: StdDuration::from_millis(100),
            ..RoutingConfig::default()
        }
    }

    /// Wires up a sink and one node, each with its own `ProtoMon` instance
    /// wrapping a plain `AlohaMac`, mirroring how `node::Node::new` composes
    /// the stack.
    fn make_monitored_pair() -> (Arc<TestStrp>, Arc<ProtoMon>, Arc<MonitoredRouting<MonitoredMac<AlohaMac<crate::radio::sim::SimulatedRadio, SystemTimer>, SystemTimer>, SystemTimer>>, Arc<ProtoMon>) {
        let medium = SimMedium::new();

        let sink_protomon = ProtoMon::new(ProtoMonConfig { enabled: true, self_addr: 0x01, sink_addr: 0x01, ..ProtoMonConfig::default() });
        let sink_inner_mac = AlohaMac::new(0x01, MacConfig::default(), Arc::new(medium.tap(-40)), SystemTimer::new());
        sink_inner_mac.start();
        let sink_mac = sink_protomon.wrap_mac(sink_inner_mac, SystemTimer::new());
        let sink_strp = Strp::new(routing_config(0x01, 0x01), sink_mac, SystemTimer::new());

        let node_protomon = ProtoMon::new(ProtoMonConfig { enabled: true, self_addr: 0x07, sink_addr: 0x01, ..ProtoMonConfig::default() });
        let node_inner_mac = AlohaMac::new(0x07, MacConfig::default(), Arc::new(medium.tap(-40)), SystemTimer::new());
        node_inner_mac.start();
        let node_mac = node_protomon.wrap_mac(node_inner_mac, SystemTimer::new());
        let node_strp = Strp::new(routing_config(0x07, 0x01), node_mac, SystemTimer::new());

        sink_strp.start();
        node_strp.start();
        std::thread::sleep(StdDuration::from_millis(300));

        let node_routing = node_protomon.wrap_routing(node_strp, SystemTimer::new());
        (sink_strp, sink_protomon, node_routing, node_protomon)
    }

    #[test]
    fn monitored_send_recv_round_trips_app_data_unchanged() {
        let (sink_strp, _sink_protomon, node_routing, _node_protomon) = make_monitored_pair();
        assert!(node_routing.send(0x01, b"hello"));

        let mut header = RoutingRecvHeader::default();
        let mut buf = [0u8; 16];
        let n = sink_strp.timed_recv(&mut header, &mut buf, StdDuration::from_secs(1));
        // The sink's own Strp is unwrapped (no MonitoredRouting), so what it
        // sees is the monitoring-prefixed frame, not the bare app payload.
        assert!(n > MonitorHeader::LEN);
        assert_eq!(&buf[MonitorHeader::LEN..MonitorHeader::LEN + 5], b"hello");
    }

    #[test]
    fn monitored_routing_records_e2e_sent_on_the_sending_node() {
        let (_sink_strp, _sink_protomon, node_routing, node_protomon) = make_monitored_pair();
        assert!(node_routing.send(0x01, b"hi"));
        assert_eq!(node_protomon.routing_metrics().get(0x01).e2e_sent, 1);
    }

    #[test]
    fn monitored_mac_records_sent_and_received_counters() {
        let (sink_strp, sink_protomon, node_routing, node_protomon) = make_monitored_pair();
        assert!(node_routing.send(0x01, b"hi"));
        let mut header = RoutingRecvHeader::default();
        let mut buf = [0u8; 32];
        sink_strp.timed_recv(&mut header, &mut buf, StdDuration::from_secs(1));

        // The node's send travels over its own MAC link to the sink.
        assert_eq!(node_protomon.mac_metrics().get(0x01).sent, 1);
        assert_eq!(sink_protomon.mac_metrics().get(0x07).received, 1);
    }
}
