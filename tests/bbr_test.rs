use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use riptide::congestion::{Bbr, BbrMode, CongestionControl, PacketSample};

const MSS: u32 = 1400;

struct LinkSim {
    bbr: Bbr,
    bottleneck: u64, // bytes per second
    rtt: Duration,
    now: Instant,
    pn: u64,
    inflight_bytes: u64,
    inflight: VecDeque<(u64, Instant, Instant, PacketSample)>,
    next_send: Instant,
    last_departure: Instant,
    /// (time, mode) samples, one per step.
    pub mode_trace: Vec<(Duration, BbrMode)>,
    start: Instant,
}

impl LinkSim {
    fn new(bottleneck: u64, rtt: Duration, seed: u64) -> Self {
        let now = Instant::now();
        Self {
            bbr: Bbr::new(MSS as usize, StdRng::seed_from_u64(seed)),
            bottleneck,
            rtt,
            now,
            pn: 0,
            inflight_bytes: 0,
            inflight: VecDeque::new(),
            next_send: now,
            last_departure: now,
            mode_trace: Vec::new(),
            start: now,
        }
    }

    fn run(&mut self, duration: Duration) {
        let step = Duration::from_micros(200);
        let end = self.now + duration;
        while self.now < end {
            self.deliver_acks();
            self.send_packets();
            self.mode_trace
                .push((self.now - self.start, self.bbr.mode()));
            self.now += step;
        }
    }

    fn deliver_acks(&mut self) {
        let mut due = Vec::new();
        while let Some(&(pn, sent, ack_at, state)) = self.inflight.front() {
            if ack_at > self.now {
                break;
            }
            self.inflight.pop_front();
            due.push((pn, sent, state));
        }
        if due.is_empty() {
            return;
        }
        self.bbr.on_ack_begin(self.now, self.inflight_bytes);
        for (pn, sent, state) in due {
            self.inflight_bytes -= state.size as u64;
            self.bbr.on_packet_acked(pn, sent, state, self.now);
        }
        self.bbr.on_ack_end(self.inflight_bytes, self.rtt);
    }

    fn send_packets(&mut self) {
        while self.next_send <= self.now && self.inflight_bytes + MSS as u64 <= self.bbr.cwnd() {
            let state =
                self.bbr
                    .on_packet_sent(self.pn, MSS, self.inflight_bytes, false, self.now);
            // Bottleneck queue: packets depart in order at the link rate.
            let service = Duration::from_secs_f64(MSS as f64 / self.bottleneck as f64);
            let departure = self.last_departure.max(self.now) + service;
            self.last_departure = departure;
            self.inflight
                .push_back((self.pn, self.now, departure + self.rtt, state));
            self.inflight_bytes += MSS as u64;
            self.pn += 1;

            // Accumulating pacer with a small catch-up allowance, so the
            // simulated sender can actually reach the configured rate.
            let rate = self.bbr.pacing_rate().max(1);
            let gap = Duration::from_secs_f64(MSS as f64 / rate as f64);
            let floor = self
                .now
                .checked_sub(Duration::from_millis(1))
                .unwrap_or(self.now);
            self.next_send = self.next_send.max(floor) + gap;
        }
    }
}

#[test]
fn test_initial_state_is_startup() {
    let bbr = Bbr::new(MSS as usize, StdRng::seed_from_u64(0));
    assert_eq!(bbr.mode(), BbrMode::Startup);
    assert_eq!(bbr.cwnd(), 32 * MSS as u64);
    assert!(bbr.pacing_rate() > 0);
    assert!(!bbr.in_recovery());
}

#[test]
fn test_startup_leaves_for_probe_bw() {
    // 100 Mbit/s bottleneck, 50 ms RTT.
    let mut sim = LinkSim::new(12_500_000, Duration::from_millis(50), 1);
    sim.run(Duration::from_secs(3));
    let saw_drain = sim.mode_trace.iter().any(|(_, m)| *m == BbrMode::Drain);
    assert!(saw_drain, "never drained the startup queue");
    assert!(
        matches!(sim.bbr.mode(), BbrMode::ProbeBw | BbrMode::ProbeRtt),
        "stuck in {:?}",
        sim.bbr.mode()
    );
}

#[test]
fn test_bandwidth_estimate_converges() {
    // After 100 round trips the estimate must sit within 10 % of the link.
    let link = 12_500_000u64;
    let mut sim = LinkSim::new(link, Duration::from_millis(50), 2);
    sim.run(Duration::from_secs(6));
    let est = sim.bbr.bandwidth_estimate();
    let err = (est as f64 - link as f64).abs() / link as f64;
    assert!(
        err < 0.10,
        "estimate {est} is {:.1}% away from {link}",
        err * 100.0
    );
}

#[test]
fn test_probe_rtt_visited_periodically_and_briefly() {
    let mut sim = LinkSim::new(6_250_000, Duration::from_millis(40), 3);
    sim.run(Duration::from_secs(24));

    let visits: Vec<(Duration, BbrMode)> = sim
        .mode_trace
        .iter()
        .copied()
        .filter(|(_, m)| *m == BbrMode::ProbeRtt)
        .collect();
    assert!(!visits.is_empty(), "PROBE_RTT never entered in 24s");

    // Each contiguous visit must be short: 200 ms floor plus a round trip
    // of slack.
    let mut runs = Vec::new();
    let mut run_start = visits[0].0;
    let mut prev = visits[0].0;
    for &(t, _) in &visits[1..] {
        if t - prev > Duration::from_millis(5) {
            runs.push(prev - run_start);
            run_start = t;
        }
        prev = t;
    }
    runs.push(prev - run_start);
    for run in runs {
        assert!(
            run < Duration::from_millis(400),
            "PROBE_RTT lasted {run:?}"
        );
    }
}

#[test]
fn test_loss_enters_recovery_and_caps_cwnd() {
    let mut bbr = Bbr::new(MSS as usize, StdRng::seed_from_u64(4));
    let t0 = Instant::now();

    // Build some history first.
    let mut states = Vec::new();
    for pn in 0..8u64 {
        states.push(bbr.on_packet_sent(pn, MSS, pn * MSS as u64, false, t0));
    }
    let t1 = t0 + Duration::from_millis(30);
    bbr.on_ack_begin(t1, 8 * MSS as u64);
    for (pn, state) in states.drain(..).enumerate().take(6) {
        bbr.on_packet_acked(pn as u64, t0, state, t1);
    }
    bbr.on_ack_end(2 * MSS as u64, Duration::from_millis(30));
    assert!(!bbr.in_recovery());
    let cwnd_before = bbr.cwnd();

    // Now an ACK round that declares a loss.
    let s8 = bbr.on_packet_sent(8, MSS, 2 * MSS as u64, false, t1);
    let s9 = bbr.on_packet_sent(9, MSS, 3 * MSS as u64, false, t1);
    let t2 = t1 + Duration::from_millis(30);
    bbr.on_ack_begin(t2, 4 * MSS as u64);
    bbr.on_packet_lost(8, s8);
    bbr.on_packet_acked(9, t1, s9, t2);
    bbr.on_ack_end(2 * MSS as u64, Duration::from_millis(30));

    assert!(bbr.in_recovery());
    assert!(
        bbr.cwnd() <= cwnd_before,
        "recovery did not constrain the window"
    );
}

#[test]
fn test_deterministic_under_same_seed() {
    let run = |seed| {
        let mut sim = LinkSim::new(2_000_000, Duration::from_millis(20), seed);
        sim.run(Duration::from_secs(2));
        (sim.bbr.bandwidth_estimate(), sim.pn)
    };
    assert_eq!(run(9), run(9));
}
