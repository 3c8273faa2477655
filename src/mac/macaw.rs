//! MACAW — RTS/CTS reservation variant (§4.3), grounded in
//! `DijkstrasMACAW/MACAW/MACAW.c`: the send FSM's states are folded into a
//! single attempt loop rather than an explicit state enum, since every state
//! here is just "do X, then either proceed or BACKOFF" — the teacher's own
//! `mac/core.rs::transmit_csma` takes the same shape (a loop with early
//! `continue`/`return`, not a state-machine object).

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use rand::Rng;

use crate::packet::{self, AckFrame, CtsFrame, DecodedFrame, MacHeader, RtsFrame, MAX_MAC_FRAME_LEN};
use crate::queue::BoundedQueue;
use crate::radio::Radio;
use crate::timer::Timer;

use super::nav::{duration_ms, Nav};
use super::{is_broadcast, ControlWaiter, Mac, MacConfig, RecvHeader, SeqTables};

const QUEUE_CAPACITY: usize = 64;
/// True worst case (§4.5): a 240-byte application datagram plus ProtoMon's
/// monitoring prefix and path trace at their largest — see
/// `packet::MAX_MAC_FRAME_LEN`.
const FRAME_BUF_LEN: usize = MAX_MAC_FRAME_LEN;
const MAX_BACKOFF_EXPONENT: u32 = 10;

struct SendRequest {
    dest: u8,
    data: Vec<u8>,
    result: Option<mpsc::Sender<bool>>,
}

pub struct MacawMac<R: Radio, T: Timer> {
    addr: u8,
    config: MacConfig,
    radio: Arc<R>,
    timer: T,
    seq: SeqTables,
    nav: Nav,
    send_queue: BoundedQueue<SendRequest>,
    recv_queue: BoundedQueue<(RecvHeader, Vec<u8>)>,
    ack_waiter: ControlWaiter<AckFrame>,
    cts_waiter: ControlWaiter<CtsFrame>,
    /// Set by the receive worker after answering an RTS, so the sender of
    /// the following data frame is not surprising; purely observational
    /// bookkeeping (§4.3 "mark a pending-reception flag"), not consulted by
    /// the data path, which accepts from anyone it gets a valid frame from.
    pending_reception: Mutex<Option<(u8, Instant)>>,
}

fn random_duration(range: (Duration, Duration)) -> Duration {
    let lo_ms = range.0.as_millis() as u64;
    let hi_ms = range.1.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(lo_ms..=hi_ms))
}

impl<R: Radio, T: Timer> MacawMac<R, T> {
    pub fn new(addr: u8, config: MacConfig, radio: Arc<R>, timer: T) -> Arc<Self> {
        Arc::new(Self {
            addr,
            config,
            radio,
            timer,
            seq: SeqTables::new(),
            nav: Nav::new(),
            send_queue: BoundedQueue::new(QUEUE_CAPACITY),
            recv_queue: BoundedQueue::new(QUEUE_CAPACITY),
            ack_waiter: ControlWaiter::new(),
            cts_waiter: ControlWaiter::new(),
            pending_reception: Mutex::new(None),
        })
    }

    pub fn start(self: &Arc<Self>) -> (JoinHandle<()>, JoinHandle<()>) {
        let send_mac = self.clone();
        let send_handle = thread::Builder::new()
            .name("mac-macaw-send".into())
            .spawn(move || send_mac.send_worker())
            .expect("failed to spawn MAC send thread");

        let recv_mac = self.clone();
        let recv_handle = thread::Builder::new()
            .name("mac-macaw-recv".into())
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

    fn wait_nav_clear(&self) {
        loop {
            let now = self.timer.now_ms();
            if self.nav.is_clear(now) {
                return;
            }
            self.timer.sleep(self.config.timeslot);
        }
    }

    fn backoff(&self, attempt: u32) {
        let c = attempt.min(MAX_BACKOFF_EXPONENT);
        let max_k = (1u64 << c).saturating_sub(1);
        let k = if max_k == 0 { 0 } else { rand::thread_rng().gen_range(0..=max_k) };
        self.timer.sleep(self.config.timeslot * k as u32);
    }

    /// §4.3 MACAW send FSM, one pass of DELAY -> LISTEN -> [AWAIT_NOISE] ->
    /// AWAIT_CTS -> AWAIT_ACK per attempt, BACKOFF between attempts.
    fn send_procedure(&self, dest: u8, data: &[u8]) -> bool {
        let seq = self.seq.next_send_seq(dest);
        let mut buf = [0u8; FRAME_BUF_LEN];

        for attempt in 0..=self.config.max_retries as u32 {
            // DELAY
            self.wait_nav_clear();
            self.timer.sleep(random_duration(self.config.ack_timeout_range));

            // LISTEN for one timeslot; the receive worker updates NAV
            // concurrently on any overheard RTS/CTS/data, so re-checking
            // after the sleep is equivalent to an explicit listen state.
            self.timer.sleep(self.config.timeslot);
            if !self.nav.is_clear(self.timer.now_ms()) {
                trace!("NAV set during LISTEN, backing off");
                self.backoff(attempt);
                continue;
            }

            if self.config.sample_noise {
                match self.radio.poll_noise() {
                    Ok(noise) if noise >= self.config.noise_threshold_dbm => {
                        trace!("ambient noise {} dBm >= threshold, backing off", noise);
                        self.backoff(attempt);
                        continue;
                    }
                    Err(e) => warn!("noise query failed: {:?}", e),
                    _ => {}
                }
            }

            if is_broadcast(dest) {
                let n = MacHeader::encode_data(self.addr, dest, seq, data, &mut buf);
                if let Err(e) = self.radio.send(&buf[..n]) {
                    warn!("radio send failed: {:?}", e);
                    return false;
                }
                return true;
            }

            // AWAIT_CTS
            let mut rts_buf = [0u8; RtsFrame::LEN];
            RtsFrame::encode(self.addr, dest, data.len() as u16, &mut rts_buf);
            if let Err(e) = self.radio.send(&rts_buf) {
                warn!("radio send failed: {:?}", e);
                return false;
            }
            let cts_deadline = Instant::now() + self.config.reservation_timeout;
            if self.cts_waiter.wait_match(cts_deadline, |cts| cts.src == dest && cts.dst == self.addr).is_none() {
                debug!("no CTS from {:#04x}, backing off", dest);
                self.backoff(attempt);
                continue;
            }

            // AWAIT_ACK
            let n = MacHeader::encode_data(self.addr, dest, seq, data, &mut buf);
            if let Err(e) = self.radio.send(&buf[..n]) {
                warn!("radio send failed: {:?}", e);
                return false;
            }
            let ack_deadline = Instant::now() + random_duration(self.config.ack_timeout_range);
            if self.ack_waiter.wait_match(ack_deadline, |ack| ack.src == dest && ack.seq == seq).is_some() {
                return true;
            }

            debug!("ACK timeout from {:#04x} seq {}, backing off", dest, seq);
            self.backoff(attempt);
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
            let now = self.timer.now_ms();

            match packet::decode::<R::Error>(&buf[..n]) {
                Ok(DecodedFrame::Rts(rts)) => self.handle_rts(rts, now),
                Ok(DecodedFrame::Cts(cts)) => self.handle_cts(cts, now),
                Ok(DecodedFrame::Data { header, payload }) => {
                    self.nav.set_at_least(now, duration_ms(self.config.nav_t_offset_ms, self.config.nav_t_per_byte_ms, AckFrame::LEN));
                    if header.dst == self.addr || is_broadcast(header.dst) {
                        self.handle_data(header.src, header.dst, header.seq, payload, rssi);
                    }
                }
                Ok(DecodedFrame::Ack(ack)) => self.ack_waiter.notify(ack),
                Ok(_) => {}
                Err(e) => debug!("dropping unparseable frame: {:?}", e),
            }
        }
    }

    fn handle_rts(&self, rts: RtsFrame, now: crate::timer::Millis) {
        if rts.dst == self.addr {
            let mut cts_buf = [0u8; CtsFrame::LEN];
            CtsFrame::encode(self.addr, rts.src, rts.msg_len, &mut cts_buf);
            if let Err(e) = self.radio.send(&cts_buf) {
                warn!("failed to send CTS: {:?}", e);
                return;
            }
            let deadline = Instant::now() + self.config.reservation_timeout;
            *self.pending_reception.lock().unwrap() = Some((rts.src, deadline));
        } else {
            let dur = duration_ms(
                self.config.nav_t_offset_ms,
                self.config.nav_t_per_byte_ms,
                CtsFrame::LEN + rts.msg_len as usize + AckFrame::LEN,
            );
            self.nav.set_at_least(now, dur);
        }
    }

    fn handle_cts(&self, cts: CtsFrame, now: crate::timer::Millis) {
        if cts.dst == self.addr {
            self.cts_waiter.notify(cts);
        } else {
            let dur = duration_ms(self.config.nav_t_offset_ms, self.config.nav_t_per_byte_ms, cts.msg_len as usize + AckFrame::LEN);
            self.nav.set_at_least(now, dur);
        }
    }

    fn handle_data(&self, src: u8, dst: u8, seq: u16, payload: &[u8], rssi: i8) {
        let broadcast = is_broadcast(dst);
        let duplicate = !broadcast && self.seq.is_duplicate(src, seq);

        if !broadcast {
            if !duplicate {
                self.seq.record_recv_seq(src, seq);
            }
            *self.pending_reception.lock().unwrap() = None;
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

impl<R: Radio, T: Timer> Mac for MacawMac<R, T> {
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

    fn make_pair() -> (Arc<MacawMac<crate::radio::sim::SimulatedRadio, SystemTimer>>, Arc<MacawMac<crate::radio::sim::SimulatedRadio, SystemTimer>>) {
        let medium = SimMedium::new();
        let mut config = MacConfig::default();
        config.ack_timeout_range = (Duration::from_millis(50), Duration::from_millis(100));
        config.timeslot = Duration::from_millis(5);
        config.reservation_timeout = Duration::from_millis(200);
        let sink = MacawMac::new(0x01, config.clone(), Arc::new(medium.tap(-40)), SystemTimer::new());
        let node = MacawMac::new(0x07, config, Arc::new(medium.tap(-40)), SystemTimer::new());
        sink.start();
        node.start();
        (sink, node)
    }

    #[test]
    fn rts_cts_handshake_delivers_unicast() {
        let (sink, node) = make_pair();
        assert!(node.send(0x01, b"hello"));

        let mut header = RecvHeader::default();
        let mut buf = [0u8; 16];
        let n = sink.timed_recv(&mut header, &mut buf, Duration::from_secs(2));
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(header.src, 0x07);
    }

    #[test]
    fn overheard_rts_sets_nav_on_bystander() {
        let medium = SimMedium::new();
        let mut config = MacConfig::default();
        config.ack_timeout_range = (Duration::from_millis(50), Duration::from_millis(100));
        config.timeslot = Duration::from_millis(5);
        let bystander = MacawMac::new(0x09, config.clone(), Arc::new(medium.tap(-40)), SystemTimer::new());
        let mut rts_buf = [0u8; RtsFrame::LEN];
        RtsFrame::encode(0x07, 0x01, 10, &mut rts_buf);
        bystander.handle_rts(RtsFrame { src: 0x07, dst: 0x01, msg_len: 10 }, 1_000);
        assert!(!bystander.nav.is_clear(1_000));
    }

    #[test]
    fn wait_nav_clear_returns_once_mock_clock_passes_deadline() {
        // `wait_nav_clear` polls `self.timer` directly (§4.3 NAV check),
        // unlike the RTS/CTS/ACK rendezvous above which clock off a raw
        // `Instant` deadline — so a multi-second NAV hold runs to completion
        // instantly here instead of costing real wall-clock time the way
        // `SystemTimer` would.
        use crate::timer::mock::MockTimer;

        let medium = SimMedium::new();
        let mut config = MacConfig::default();
        config.timeslot = Duration::from_millis(100);
        let timer = MockTimer::new();
        let node = MacawMac::new(0x09, config, Arc::new(medium.tap(-40)), timer.clone());
        node.nav.set_at_least(0, 5_000);

        node.wait_nav_clear();

        assert!(node.nav.is_clear(timer.now_ms()));
        assert!(timer.now_ms() >= 5_000);
    }
}
