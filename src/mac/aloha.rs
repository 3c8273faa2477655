//! ALOHA — the baseline MAC variant (§4.3), grounded in
//! `STRPAloha/ALOHA/ALOHA.c` in full: two worker threads (`sendT`/`recvT` in
//! the original), per-destination/per-source sequence tables, ACK-driven
//! retransmission, optional ambient-noise backoff.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use rand::Rng;

use crate::neighbor::BROADCAST_ADDR;
use crate::packet::{self, AckFrame, DecodedFrame, MacHeader, MAX_MAC_FRAME_LEN};
use crate::queue::BoundedQueue;
use crate::radio::Radio;
use crate::timer::Timer;

use super::{is_broadcast, ControlWaiter, Mac, MacConfig, RecvHeader, SeqTables};

const QUEUE_CAPACITY: usize = 64;
/// True worst case (§4.5): a 240-byte application datagram plus ProtoMon's
/// monitoring prefix and path trace at their largest, not just
/// `MAC_HEADER_LEN + MAX_PAYLOAD_LEN` — see `packet::MAX_MAC_FRAME_LEN`.
const FRAME_BUF_LEN: usize = MAX_MAC_FRAME_LEN;

struct SendRequest {
    dest: u8,
    data: Vec<u8>,
    result: Option<mpsc::Sender<bool>>,
}

pub struct AlohaMac<R: Radio, T: Timer> {
    addr: u8,
    config: MacConfig,
    radio: Arc<R>,
    timer: T,
    seq: SeqTables,
    send_queue: BoundedQueue<SendRequest>,
    recv_queue: BoundedQueue<(RecvHeader, Vec<u8>)>,
    ack_waiter: ControlWaiter<AckFrame>,
}

fn random_ack_timeout(range: (Duration, Duration)) -> Duration {
    let (lo, hi) = range;
    let lo_ms = lo.as_millis() as u64;
    let hi_ms = hi.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(lo_ms..=hi_ms))
}

impl<R: Radio, T: Timer> AlohaMac<R, T> {
    pub fn new(addr: u8, config: MacConfig, radio: Arc<R>, timer: T) -> Arc<Self> {
        Arc::new(Self {
            addr,
            config,
            radio,
            timer,
            seq: SeqTables::new(),
            send_queue: BoundedQueue::new(QUEUE_CAPACITY),
            recv_queue: BoundedQueue::new(QUEUE_CAPACITY),
            ack_waiter: ControlWaiter::new(),
        })
    }

    /// Spawn the send and receive worker threads (§5).
    pub fn start(self: &Arc<Self>) -> (JoinHandle<()>, JoinHandle<()>) {
        let send_mac = self.clone();
        let send_handle = thread::Builder::new()
            .name("mac-aloha-send".into())
            .spawn(move || send_mac.send_worker())
            .expect("failed to spawn MAC send thread");

        let recv_mac = self.clone();
        let recv_handle = thread::Builder::new()
            .name("mac-aloha-recv".into())
            .spawn(move || recv_mac.recv_worker())
            .expect("failed to spawn MAC receive thread");

        (send_handle, recv_handle)
    }

    fn send_worker(&self) {
        loop {
            let req = self.send_queue.dequeue();
            let success = self.send_procedure(req.dest, &req.data);
            if let Some(tx) = req.result {
                let _ = tx.send(success);
            }
        }
    }

    /// §4.3 ALOHA send procedure, steps 1-4.
    fn send_procedure(&self, dest: u8, data: &[u8]) -> bool {
        let seq = self.seq.next_send_seq(dest);
        let mut buf = [0u8; FRAME_BUF_LEN];

        for attempt in 0..=self.config.max_retries {
            if self.config.sample_noise {
                match self.radio.poll_noise() {
                    Ok(noise) if noise >= self.config.noise_threshold_dbm => {
                        trace!("ambient noise {} dBm >= threshold, backing off", noise);
                        self.timer.sleep(random_ack_timeout(self.config.ack_timeout_range));
                        continue;
                    }
                    Err(e) => {
                        warn!("noise query failed: {:?}", e);
                    }
                    _ => {}
                }
            }

            let n = MacHeader::encode_data(self.addr, dest, seq, data, &mut buf);
            if let Err(e) = self.radio.send(&buf[..n]) {
                warn!("radio send failed: {:?}", e);
                return false;
            }

            if is_broadcast(dest) {
                return true;
            }

            let deadline = Instant::now() + random_ack_timeout(self.config.ack_timeout_range);
            if self.ack_waiter.wait_match(deadline, |ack| ack.src == dest && ack.seq == seq).is_some() {
                debug!("ACK received from {:#04x} for seq {}", dest, seq);
                return true;
            }

            debug!("ACK timeout to {:#04x} seq {}, attempt {}", dest, seq, attempt);
        }

        false
    }

    fn recv_worker(&self) {
        let mut buf = [0u8; FRAME_BUF_LEN];
        loop {
            let n = match self.radio.recv(&mut buf) {
                Ok(0) => continue,
                Ok(n) => n,
                Err(e) => {
                    warn!("radio recv error: {:?}", e);
                    continue;
                }
            };
            let rssi = self.radio.last_rssi();

            match packet::decode::<R::Error>(&buf[..n]) {
                Ok(DecodedFrame::Data { header, payload }) => {
                    if header.dst != self.addr && !is_broadcast(header.dst) {
                        continue;
                    }
                    self.handle_data(header.src, header.dst, header.seq, payload, rssi);
                }
                Ok(DecodedFrame::Ack(ack)) => {
                    self.ack_waiter.notify(ack);
                }
                Ok(_) => {
                    // RTS/CTS/wake frames are not meaningful to plain ALOHA; ignore.
                }
                Err(e) => {
                    debug!("dropping unparseable frame: {:?}", e);
                }
            }
        }
    }

    fn handle_data(&self, src: u8, dst: u8, seq: u16, payload: &[u8], rssi: i8) {
        let broadcast = is_broadcast(dst);
        let duplicate = !broadcast && self.seq.is_duplicate(src, seq);

        if !broadcast {
            if !duplicate {
                self.seq.record_recv_seq(src, seq);
            }
            let mut ack_buf = [0u8; AckFrame::LEN];
            AckFrame::encode(self.addr, src, seq, &mut ack_buf);
            if let Err(e) = self.radio.send(&ack_buf) {
                warn!("failed to send ACK: {:?}", e);
            }
        }

        if duplicate {
            trace!("dropping duplicate seq {} from {:#04x}", seq, src);
            return;
        }

        let header = RecvHeader { src, dst, seq, len: payload.len() as u16, rssi };
        if self.recv_queue.try_enqueue((header, payload.to_vec())).is_err() {
            warn!("MAC receive queue full, dropping frame from {:#04x}", src);
        }
    }
}

impl<R: Radio, T: Timer> Mac for AlohaMac<R, T> {
    fn send(&self, dest: u8, data: &[u8]) -> bool {
        let (tx, rx) = mpsc::channel();
        self.send_queue.enqueue(SendRequest { dest, data: data.to_vec(), result: Some(tx) });
        rx.recv().unwrap_or(false)
    }

    fn isend(&self, dest: u8, data: &[u8]) -> bool {
        self.send_queue.try_enqueue(SendRequest { dest, data: data.to_vec(), result: None }).is_ok()
    }

    fn recv(&self, header: &mut RecvHeader, data: &mut [u8]) -> usize {
        let (h, payload) = self.recv_queue.dequeue();
        copy_payload(h, payload, header, data)
    }

    fn try_recv(&self, header: &mut RecvHeader, data: &mut [u8]) -> usize {
        match self.recv_queue.try_dequeue() {
            Some((h, payload)) => copy_payload(h, payload, header, data),
            None => 0,
        }
    }

    fn timed_recv(&self, header: &mut RecvHeader, data: &mut [u8], timeout: Duration) -> usize {
        use crate::queue::DequeueOutcome;
        match self.recv_queue.timed_dequeue_for(timeout) {
            DequeueOutcome::Item((h, payload)) => copy_payload(h, payload, header, data),
            DequeueOutcome::TimedOut => 0,
        }
    }
}

fn copy_payload(h: RecvHeader, payload: Vec<u8>, header: &mut RecvHeader, data: &mut [u8]) -> usize {
    *header = h;
    let n = payload.len().min(data.len());
    data[..n].copy_from_slice(&payload[..n]);
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::sim::SimMedium;
    use crate::timer::SystemTimer;

    fn make_pair() -> (Arc<AlohaMac<crate::radio::sim::SimulatedRadio, SystemTimer>>, Arc<AlohaMac<crate::radio::sim::SimulatedRadio, SystemTimer>>) {
        let medium = SimMedium::new();
        let sink = AlohaMac::new(0x01, MacConfig::default(), Arc::new(medium.tap(-40)), SystemTimer::new());
        let node = AlohaMac::new(0x07, MacConfig::default(), Arc::new(medium.tap(-40)), SystemTimer::new());
        sink.start();
        node.start();
        (sink, node)
    }

    #[test]
    fn unicast_send_is_acked_and_delivered() {
        let (sink, node) = make_pair();
        assert!(node.send(0x01, b"ping"));

        let mut header = RecvHeader::default();
        let mut buf = [0u8; 16];
        let n = sink.timed_recv(&mut header, &mut buf, Duration::from_secs(1));
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(header.src, 0x07);
    }

    #[test]
    fn duplicate_seq_is_dropped_but_reacked() {
        let (sink, node) = make_pair();
        assert!(node.send(0x01, b"abcd"));
        let mut header = RecvHeader::default();
        let mut buf = [0u8; 16];
        assert!(sink.timed_recv(&mut header, &mut buf, Duration::from_secs(1)) > 0);

        // Re-deliver the same frame directly, bypassing the resend path,
        // to exercise the sink's dedup check (§8 S4).
        sink.handle_data(0x07, 0x01, header.seq, b"abcd", -40);
        let n = sink.timed_recv(&mut header, &mut buf, Duration::from_millis(100));
        assert_eq!(n, 0);
    }

    #[test]
    fn broadcast_bypasses_dedup_and_ack() {
        let (sink, _node) = make_pair();
        sink.handle_data(0x09, BROADCAST_ADDR, 0, b"bcast", -40);
        sink.handle_data(0x09, BROADCAST_ADDR, 0, b"bcast", -40);
        let mut header = RecvHeader::default();
        let mut buf = [0u8; 16];
        assert_eq!(sink.timed_recv(&mut header, &mut buf, Duration::from_millis(100)), 5);
        assert_eq!(sink.timed_recv(&mut header, &mut buf, Duration::from_millis(100)), 5);
    }
}
