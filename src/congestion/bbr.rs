//! BBRv1: models the path as a bottleneck link and steers the flow around
//! the bandwidth-delay product instead of reacting to loss.

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, trace};

use super::minmax::MinMax;
use super::sampler::{
    Bandwidth, BandwidthSample, BandwidthSampler, PacketSample, bandwidth_from_bytes_and_delta,
};
use super::CongestionControl;

/// STARTUP gain, 2/ln(2).
const HIGH_GAIN: f32 = 2.885;
/// PROBE_BW congestion-window gain.
const CWND_GAIN: f32 = 2.0;
/// Bandwidth must grow by this factor per round for STARTUP to continue.
const STARTUP_GROWTH_TARGET: f32 = 1.25;
/// Rounds without growth before STARTUP concludes the pipe is full.
const STARTUP_ROUNDS_WITHOUT_GROWTH: u32 = 3;
/// The gain cycle driven through during PROBE_BW.
const PACING_GAIN_CYCLE: [f32; 8] = [1.25, 0.75, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
/// Width of the max-bandwidth window, in round trips.
const BANDWIDTH_WINDOW_ROUNDS: u64 = 10;
/// Lifetime of a min-RTT measurement before PROBE_RTT refreshes it.
const MIN_RTT_EXPIRY: Duration = Duration::from_secs(10);
/// Minimum time spent at the reduced PROBE_RTT window.
const PROBE_RTT_TIME: Duration = Duration::from_millis(200);
/// An RTT within this factor of the current minimum is "similar enough"
/// to skip PROBE_RTT when app-limited.
const SIMILAR_MIN_RTT_THRESHOLD: f32 = 1.125;
/// PROBE_RTT window when based on the BDP rather than the packet floor.
const MODERATE_PROBE_RTT_MULTIPLIER: f32 = 0.75;
/// Assumed RTT before any measurement exists.
const DEFAULT_MIN_RTT: Duration = Duration::from_millis(25);

const INITIAL_CWND_PACKETS: u64 = 32;
const MIN_CWND_PACKETS: u64 = 4;
const MAX_CWND_PACKETS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BbrMode {
    Startup,
    Drain,
    ProbeBw,
    ProbeRtt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecoveryState {
    NotInRecovery,
    /// Packet conservation right after a loss round.
    Conservation,
    Growth,
}

/// Optional behaviors, all off by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct BbrOptions {
    /// Declare full bandwidth on the first loss while still in STARTUP.
    pub exit_startup_on_loss: bool,
    /// Use `0.75 × BDP` during PROBE_RTT instead of the 4-packet floor.
    pub probe_rtt_based_on_bdp: bool,
    /// Skip PROBE_RTT entirely while the flow is app-limited.
    pub probe_rtt_disabled_if_app_limited: bool,
    /// Skip PROBE_RTT while app-limited if the RTT stayed similar.
    pub probe_rtt_skipped_if_similar_rtt: bool,
    /// Hold the low gain until inflight actually drains to the target.
    pub drain_to_target: bool,
}

/// Scratch state accumulated between `on_ack_begin` and `on_ack_end`.
#[derive(Debug, Default)]
struct AckState {
    ack_time: Option<Instant>,
    max_pn: Option<u64>,
    acked_bytes: u64,
    lost_bytes: u64,
    total_acked_before: u64,
    prior_inflight: u64,
    has_losses: bool,
    samples: Vec<BandwidthSample>,
}

#[derive(Debug)]
pub struct Bbr {
    mode: BbrMode,
    recovery_state: RecoveryState,
    options: BbrOptions,
    sampler: BandwidthSampler,
    max_bandwidth: MinMax,
    /// Windowed maximum of bytes acked in excess of `max_bw × elapsed`.
    max_ack_height: MinMax,
    aggregation_epoch_start: Option<Instant>,
    aggregation_epoch_bytes: u64,

    min_rtt: Duration,
    min_rtt_timestamp: Option<Instant>,
    min_rtt_since_last_probe: Duration,
    /// RTT estimator's minimum, the fallback before own samples exist.
    rtt_floor: Duration,

    mss: u64,
    init_cwnd: u64,
    min_cwnd: u64,
    max_cwnd: u64,
    cwnd: u64,
    recovery_window: u64,

    pacing_rate: Bandwidth,
    pacing_gain: f32,
    cwnd_gain: f32,
    high_gain: f32,
    high_cwnd_gain: f32,
    drain_gain: f32,

    last_sent_pn: u64,
    current_round_trip_end: Option<u64>,
    round_count: u64,
    end_recovery_at: Option<u64>,

    num_startup_rtts: u32,
    rounds_without_bw_gain: u32,
    bw_at_last_round: Bandwidth,
    is_at_full_bandwidth: bool,

    cycle_index: usize,
    last_cycle_start: Option<Instant>,
    exit_probe_rtt_at: Option<Instant>,
    probe_rtt_round_passed: bool,

    in_ack: bool,
    last_sample_app_limited: bool,
    has_non_app_limited_sample: bool,
    app_limited_since_last_probe_rtt: bool,
    ack_state: AckState,

    rng: rand::rngs::StdRng,
}

impl Bbr {
    pub fn new(mss: usize, rng: rand::rngs::StdRng) -> Self {
        Self::with_options(mss, BbrOptions::default(), rng)
    }

    pub fn with_options(mss: usize, options: BbrOptions, rng: rand::rngs::StdRng) -> Self {
        let mss = mss as u64;
        Self {
            mode: BbrMode::Startup,
            recovery_state: RecoveryState::NotInRecovery,
            options,
            sampler: BandwidthSampler::new(),
            max_bandwidth: MinMax::new(BANDWIDTH_WINDOW_ROUNDS),
            max_ack_height: MinMax::new(BANDWIDTH_WINDOW_ROUNDS),
            aggregation_epoch_start: None,
            aggregation_epoch_bytes: 0,
            min_rtt: Duration::ZERO,
            min_rtt_timestamp: None,
            min_rtt_since_last_probe: Duration::MAX,
            rtt_floor: Duration::ZERO,
            mss,
            init_cwnd: INITIAL_CWND_PACKETS * mss,
            min_cwnd: MIN_CWND_PACKETS * mss,
            max_cwnd: MAX_CWND_PACKETS * mss,
            cwnd: INITIAL_CWND_PACKETS * mss,
            recovery_window: 0,
            pacing_rate: 0,
            pacing_gain: HIGH_GAIN,
            cwnd_gain: HIGH_GAIN,
            high_gain: HIGH_GAIN,
            high_cwnd_gain: HIGH_GAIN,
            drain_gain: 1.0 / HIGH_GAIN,
            last_sent_pn: 0,
            current_round_trip_end: None,
            round_count: 0,
            end_recovery_at: None,
            num_startup_rtts: STARTUP_ROUNDS_WITHOUT_GROWTH,
            rounds_without_bw_gain: 0,
            bw_at_last_round: 0,
            is_at_full_bandwidth: false,
            cycle_index: 0,
            last_cycle_start: None,
            exit_probe_rtt_at: None,
            probe_rtt_round_passed: false,
            in_ack: false,
            last_sample_app_limited: false,
            has_non_app_limited_sample: false,
            app_limited_since_last_probe_rtt: false,
            ack_state: AckState::default(),
            rng,
        }
    }

    pub fn mode(&self) -> BbrMode {
        self.mode
    }

    pub fn in_recovery(&self) -> bool {
        self.recovery_state != RecoveryState::NotInRecovery
    }

    /// Best current bandwidth estimate in bytes per second.
    pub fn bandwidth_estimate(&self) -> Bandwidth {
        self.max_bandwidth.get()
    }

    pub fn round_count(&self) -> u64 {
        self.round_count
    }

    /// Installs a new segment size (from the MTU prober) and rescales the
    /// packet-derived window bounds.
    pub fn set_mss(&mut self, mss: usize) {
        let mss = mss as u64;
        self.mss = mss;
        self.init_cwnd = INITIAL_CWND_PACKETS * mss;
        self.min_cwnd = MIN_CWND_PACKETS * mss;
        self.max_cwnd = MAX_CWND_PACKETS * mss;
    }

    /// Marks the flow app-limited unless the window is already full.
    fn app_limited(&mut self, inflight: u64) {
        let cwnd = self.cwnd();
        if inflight >= cwnd {
            return;
        }
        self.app_limited_since_last_probe_rtt = true;
        self.sampler.on_app_limited();
        trace!(
            last_sent_pn = self.last_sent_pn,
            cwnd, "becoming application-limited"
        );
    }

    fn get_min_rtt(&self) -> Duration {
        if !self.min_rtt.is_zero() {
            self.min_rtt
        } else if !self.rtt_floor.is_zero() {
            self.rtt_floor
        } else {
            DEFAULT_MIN_RTT
        }
    }

    fn target_cwnd(&self, gain: f32) -> u64 {
        let bdp = (self.get_min_rtt().as_secs_f64() * self.max_bandwidth.get() as f64) as u64;
        let mut cwnd = (gain as f64 * bdp as f64) as u64;
        if cwnd == 0 {
            cwnd = (gain as f64 * self.init_cwnd as f64) as u64;
        }
        cwnd.max(self.min_cwnd)
    }

    fn probe_rtt_cwnd(&self) -> u64 {
        if self.options.probe_rtt_based_on_bdp {
            self.target_cwnd(MODERATE_PROBE_RTT_MULTIPLIER)
        } else {
            self.min_cwnd
        }
    }

    fn enter_startup_mode(&mut self) {
        self.set_mode(BbrMode::Startup);
        self.pacing_gain = self.high_gain;
        self.cwnd_gain = self.high_cwnd_gain;
    }

    fn enter_probe_bw_mode(&mut self, now: Instant) {
        self.set_mode(BbrMode::ProbeBw);
        self.cwnd_gain = CWND_GAIN;
        // Random start phase, but never the drain phase at index 1: the
        // cycle must not open by shrinking the window it cannot yet refill.
        let mut offset = self.rng.r#gen::<usize>() % (PACING_GAIN_CYCLE.len() - 1);
        if offset >= 1 {
            offset += 1;
        }
        self.cycle_index = offset;
        self.last_cycle_start = Some(now);
        self.pacing_gain = PACING_GAIN_CYCLE[self.cycle_index];
    }

    fn set_mode(&mut self, mode: BbrMode) {
        if self.mode != mode {
            debug!(from = ?self.mode, to = ?mode, "BBR mode change");
            self.mode = mode;
        }
    }

    fn update_bandwidth_and_min_rtt(&mut self, samples: &[BandwidthSample]) -> bool {
        let ack_time = self.ack_state.ack_time.expect("inside an ACK block");
        let mut sample_min_rtt: Option<Duration> = None;

        for sample in samples {
            if sample.is_app_limited {
                self.last_sample_app_limited = true;
            } else {
                self.last_sample_app_limited = false;
                self.has_non_app_limited_sample = true;
            }

            if sample_min_rtt.is_none_or(|m| sample.rtt < m) {
                sample_min_rtt = Some(sample.rtt);
            }

            // App-limited samples must not pull the estimate down.
            if !sample.is_app_limited || sample.bandwidth > self.max_bandwidth.get() {
                self.max_bandwidth.update_max(self.round_count, sample.bandwidth);
            }
        }

        let Some(sample_min_rtt) = sample_min_rtt else {
            return false;
        };

        self.min_rtt_since_last_probe = self.min_rtt_since_last_probe.min(sample_min_rtt);
        let mut min_rtt_expired = !self.min_rtt.is_zero()
            && self
                .min_rtt_timestamp
                .is_some_and(|stamp| ack_time > stamp + MIN_RTT_EXPIRY);

        if min_rtt_expired || sample_min_rtt < self.min_rtt || self.min_rtt.is_zero() {
            if min_rtt_expired && self.should_extend_min_rtt_expiry() {
                trace!(min_rtt = ?self.min_rtt, "min RTT expiry extended");
                min_rtt_expired = false;
            } else {
                debug!(old = ?self.min_rtt, new = ?sample_min_rtt, "min RTT updated");
                self.min_rtt = sample_min_rtt;
            }
            self.min_rtt_timestamp = Some(ack_time);
            self.min_rtt_since_last_probe = Duration::MAX;
            self.app_limited_since_last_probe_rtt = false;
        }

        min_rtt_expired
    }

    fn should_extend_min_rtt_expiry(&self) -> bool {
        if self.options.probe_rtt_disabled_if_app_limited && self.app_limited_since_last_probe_rtt {
            return true;
        }
        let increased_since_last_probe = self.min_rtt_since_last_probe
            > self.min_rtt.mul_f32(SIMILAR_MIN_RTT_THRESHOLD);
        self.options.probe_rtt_skipped_if_similar_rtt
            && self.app_limited_since_last_probe_rtt
            && !increased_since_last_probe
    }

    fn update_recovery_state(&mut self, is_round_start: bool) {
        // Exit recovery only after a full round without losses.
        if self.ack_state.has_losses {
            self.end_recovery_at = Some(self.last_sent_pn);
        }

        match self.recovery_state {
            RecoveryState::NotInRecovery => {
                if self.ack_state.has_losses {
                    self.recovery_state = RecoveryState::Conservation;
                    // Set up in calculate_recovery_window.
                    self.recovery_window = 0;
                    // Conservation lasts a whole round; restart it here.
                    self.current_round_trip_end = Some(self.last_sent_pn);
                }
            }
            RecoveryState::Conservation | RecoveryState::Growth => {
                if self.recovery_state == RecoveryState::Conservation && is_round_start {
                    self.recovery_state = RecoveryState::Growth;
                }
                if !self.ack_state.has_losses
                    && self
                        .ack_state
                        .max_pn
                        .zip(self.end_recovery_at)
                        .is_some_and(|(max_pn, end)| max_pn > end)
                {
                    self.recovery_state = RecoveryState::NotInRecovery;
                }
            }
        }
    }

    fn update_ack_aggregation_bytes(&mut self, bytes_acked: u64) -> u64 {
        let ack_time = self.ack_state.ack_time.expect("inside an ACK block");
        let epoch_start = *self.aggregation_epoch_start.get_or_insert(ack_time);

        // Bytes the estimated bandwidth would have delivered this epoch.
        let elapsed = ack_time.saturating_duration_since(epoch_start);
        let expected_bytes_acked =
            (self.max_bandwidth.get() as f64 * elapsed.as_secs_f64()) as u64;

        // The epoch resets whenever the ack rate drops back to the estimate.
        if self.aggregation_epoch_bytes <= expected_bytes_acked {
            self.aggregation_epoch_start = Some(ack_time);
            self.aggregation_epoch_bytes = bytes_acked;
            return 0;
        }

        self.aggregation_epoch_bytes += bytes_acked;
        let excess = self.aggregation_epoch_bytes - expected_bytes_acked;
        self.max_ack_height.update_max(self.round_count, excess);
        excess
    }

    fn update_gain_cycle_phase(&mut self, inflight: u64) {
        let now = self.ack_state.ack_time.expect("inside an ACK block");
        let prior_inflight = self.ack_state.prior_inflight;

        let mut should_advance = self
            .last_cycle_start
            .is_none_or(|start| now.saturating_duration_since(start) >= self.get_min_rtt());

        // In the up-phase, stay until inflight actually reaches the probed
        // target (unless losses say the queue is already full).
        if self.pacing_gain > 1.0
            && !self.ack_state.has_losses
            && prior_inflight < self.target_cwnd(self.pacing_gain)
        {
            should_advance = false;
        }

        // In the down-phase, move on as soon as the queue has drained.
        if self.pacing_gain < 1.0 && inflight <= self.target_cwnd(1.0) {
            should_advance = true;
        }

        if should_advance {
            self.cycle_index = (self.cycle_index + 1) % PACING_GAIN_CYCLE.len();
            self.last_cycle_start = Some(now);
            if self.options.drain_to_target
                && self.pacing_gain < 1.0
                && PACING_GAIN_CYCLE[self.cycle_index] == 1.0
                && inflight > self.target_cwnd(1.0)
            {
                return;
            }
            self.pacing_gain = PACING_GAIN_CYCLE[self.cycle_index];
            trace!(pacing_gain = self.pacing_gain, "advanced gain cycle");
        }
    }

    fn check_full_bw_reached(&mut self) {
        if self.last_sample_app_limited {
            return;
        }

        let target = (self.bw_at_last_round as f64 * STARTUP_GROWTH_TARGET as f64) as u64;
        let bw = self.max_bandwidth.get();
        if bw >= target {
            self.bw_at_last_round = bw;
            self.rounds_without_bw_gain = 0;
            return;
        }

        self.rounds_without_bw_gain += 1;
        if self.rounds_without_bw_gain >= self.num_startup_rtts
            || (self.options.exit_startup_on_loss && self.in_recovery())
        {
            debug_assert!(self.has_non_app_limited_sample);
            self.is_at_full_bandwidth = true;
            debug!(
                rounds = self.rounds_without_bw_gain,
                bw, "full bandwidth reached"
            );
        }
    }

    fn maybe_exit_startup_or_drain(&mut self, now: Instant, inflight: u64) {
        if self.mode == BbrMode::Startup && self.is_at_full_bandwidth {
            self.set_mode(BbrMode::Drain);
            self.pacing_gain = self.drain_gain;
            self.cwnd_gain = self.high_cwnd_gain;
        }

        if self.mode == BbrMode::Drain && inflight <= self.target_cwnd(1.0) {
            self.enter_probe_bw_mode(now);
        }
    }

    fn maybe_enter_or_exit_probe_rtt(
        &mut self,
        now: Instant,
        is_round_start: bool,
        min_rtt_expired: bool,
        inflight: u64,
    ) {
        if min_rtt_expired && self.mode != BbrMode::ProbeRtt {
            self.set_mode(BbrMode::ProbeRtt);
            self.pacing_gain = 1.0;
            // The exit clock starts only once inflight reaches the target.
            self.exit_probe_rtt_at = None;
        }

        if self.mode == BbrMode::ProbeRtt {
            self.sampler.on_app_limited();
            match self.exit_probe_rtt_at {
                None => {
                    if inflight < self.probe_rtt_cwnd() + self.mss {
                        self.probe_rtt_round_passed = false;
                        self.exit_probe_rtt_at = Some(now + PROBE_RTT_TIME);
                    }
                }
                Some(exit_at) => {
                    if is_round_start {
                        self.probe_rtt_round_passed = true;
                    }
                    if now >= exit_at && self.probe_rtt_round_passed {
                        self.min_rtt_timestamp = Some(now);
                        if self.is_at_full_bandwidth {
                            self.enter_probe_bw_mode(now);
                        } else {
                            self.enter_startup_mode();
                        }
                    }
                }
            }
        }
    }

    fn calculate_pacing_rate(&mut self) {
        let bw = self.max_bandwidth.get();
        if bw == 0 {
            return;
        }

        let target_rate = (bw as f64 * self.pacing_gain as f64) as u64;
        if self.is_at_full_bandwidth {
            self.pacing_rate = target_rate;
            return;
        }

        // Until the first RTT measurement, pace at initial-window-per-RTT.
        if self.pacing_rate == 0 && !self.rtt_floor.is_zero() {
            self.pacing_rate = bandwidth_from_bytes_and_delta(self.init_cwnd, self.rtt_floor);
            return;
        }

        // During STARTUP the pacing rate never decreases.
        if self.pacing_rate < target_rate {
            self.pacing_rate = target_rate;
        }
    }

    fn calculate_cwnd(&mut self, bytes_acked: u64, excess_acked: u64) {
        if self.mode == BbrMode::ProbeRtt {
            return;
        }

        let mut target_window = self.target_cwnd(self.cwnd_gain);
        if self.is_at_full_bandwidth {
            // Absorb ack aggregation on top of the BDP-derived target.
            target_window += self.max_ack_height.get();
        } else {
            target_window += excess_acked;
        }

        if self.is_at_full_bandwidth {
            self.cwnd = target_window.min(self.cwnd + bytes_acked);
        } else if self.cwnd < target_window || self.sampler.total_acked() < self.init_cwnd {
            self.cwnd += bytes_acked;
        }

        self.cwnd = self.cwnd.clamp(self.min_cwnd, self.max_cwnd);
    }

    fn calculate_recovery_window(&mut self, bytes_acked: u64, bytes_lost: u64, inflight: u64) {
        if self.recovery_state == RecoveryState::NotInRecovery {
            return;
        }

        if self.recovery_window == 0 {
            self.recovery_window = (inflight + bytes_acked).max(self.min_cwnd);
            return;
        }

        // Losses during recovery shrink the window, never below one segment.
        if self.recovery_window >= bytes_lost {
            self.recovery_window -= bytes_lost;
        } else {
            self.recovery_window = self.mss;
        }

        if self.recovery_state == RecoveryState::Growth {
            self.recovery_window += bytes_acked;
        }

        self.recovery_window = self
            .recovery_window
            .max(inflight + bytes_acked)
            .max(self.min_cwnd);
    }
}

impl CongestionControl for Bbr {
    fn on_packet_sent(
        &mut self,
        pn: u64,
        size: u32,
        inflight: u64,
        app_limited: bool,
        now: Instant,
    ) -> PacketSample {
        let sample = self.sampler.on_packet_sent(pn, size, inflight, now);
        self.last_sent_pn = pn;
        if app_limited {
            self.app_limited(inflight);
        }
        sample
    }

    fn on_ack_begin(&mut self, now: Instant, inflight: u64) {
        debug_assert!(!self.in_ack);
        self.in_ack = true;
        self.ack_state = AckState {
            ack_time: Some(now),
            prior_inflight: inflight,
            total_acked_before: self.sampler.total_acked(),
            ..AckState::default()
        };
    }

    fn on_packet_acked(&mut self, pn: u64, sent_time: Instant, state: PacketSample, now: Instant) {
        debug_assert!(self.in_ack);
        let size = state.size;
        if let Some(sample) = self.sampler.on_packet_acked(pn, sent_time, state, now) {
            self.ack_state.samples.push(sample);
        }
        if self.ack_state.max_pn.is_none_or(|max| pn > max) {
            self.ack_state.max_pn = Some(pn);
        }
        self.ack_state.acked_bytes += size as u64;
    }

    fn on_packet_lost(&mut self, pn: u64, state: PacketSample) {
        self.sampler.on_packet_lost(state.size);
        self.ack_state.has_losses = true;
        self.ack_state.lost_bytes += state.size as u64;
        trace!(pn, total_lost = self.sampler.total_lost(), "packet lost");
    }

    fn on_ack_end(&mut self, inflight: u64, rtt_floor: Duration) {
        debug_assert!(self.in_ack);
        self.in_ack = false;
        self.rtt_floor = rtt_floor;

        let now = self.ack_state.ack_time.expect("ack_begin ran");
        let bytes_acked = self.sampler.total_acked() - self.ack_state.total_acked_before;
        let samples = std::mem::take(&mut self.ack_state.samples);

        let (is_round_start, min_rtt_expired, excess_acked);
        if self.ack_state.acked_bytes > 0 {
            is_round_start = self
                .ack_state
                .max_pn
                .zip(self.current_round_trip_end)
                .is_none_or(|(max_pn, end)| max_pn > end);
            if is_round_start {
                self.round_count += 1;
                self.current_round_trip_end = Some(self.last_sent_pn);
                trace!(
                    round = self.round_count,
                    end = self.last_sent_pn,
                    "round trip advanced"
                );
            }
            min_rtt_expired = self.update_bandwidth_and_min_rtt(&samples);
            self.update_recovery_state(is_round_start);
            excess_acked = self.update_ack_aggregation_bytes(bytes_acked);
        } else {
            is_round_start = false;
            min_rtt_expired = false;
            excess_acked = 0;
        }

        if self.mode == BbrMode::ProbeBw {
            self.update_gain_cycle_phase(inflight);
        }

        if is_round_start && !self.is_at_full_bandwidth {
            self.check_full_bw_reached();
        }

        self.maybe_exit_startup_or_drain(now, inflight);
        self.maybe_enter_or_exit_probe_rtt(now, is_round_start, min_rtt_expired, inflight);

        let bytes_lost = self.ack_state.lost_bytes;
        self.calculate_pacing_rate();
        self.calculate_cwnd(bytes_acked, excess_acked);
        self.calculate_recovery_window(bytes_acked, bytes_lost, inflight);
    }

    fn cwnd(&self) -> u64 {
        if self.mode == BbrMode::ProbeRtt {
            self.probe_rtt_cwnd()
        } else if self.in_recovery() {
            self.cwnd.min(self.recovery_window.max(self.min_cwnd))
        } else {
            self.cwnd
        }
    }

    fn pacing_rate(&self) -> Bandwidth {
        if self.pacing_rate != 0 {
            return self.pacing_rate;
        }
        // No estimate yet: initial window over the assumed RTT, scaled by
        // the startup gain.
        let bw = bandwidth_from_bytes_and_delta(self.init_cwnd, self.get_min_rtt());
        (bw as f64 * self.high_cwnd_gain as f64) as u64
    }

    fn min_rtt(&self) -> Duration {
        self.get_min_rtt()
    }
}
