use std::time::{Duration, Instant};

pub mod bbr;
pub mod minmax;
pub mod sampler;

pub use bbr::{Bbr, BbrMode, BbrOptions};
pub use minmax::MinMax;
pub use sampler::{Bandwidth, BandwidthSample, BandwidthSampler, PacketSample};

/// The congestion-control seam the connection drives.
///
/// ACK processing is bracketed: `on_ack_begin`, one `on_packet_acked` /
/// `on_packet_lost` per affected packet, then `on_ack_end` where the
/// controller recomputes its pacing rate and congestion window.
pub trait CongestionControl: Send {
    /// Registers a sent packet and returns the sampler state the caller
    /// must keep alive until the packet is acked or lost.
    fn on_packet_sent(
        &mut self,
        pn: u64,
        size: u32,
        inflight: u64,
        app_limited: bool,
        now: Instant,
    ) -> PacketSample;

    fn on_ack_begin(&mut self, now: Instant, inflight: u64);

    fn on_packet_acked(&mut self, pn: u64, sent_time: Instant, state: PacketSample, now: Instant);

    fn on_packet_lost(&mut self, pn: u64, state: PacketSample);

    /// `rtt_floor` is the RTT estimator's minimum, used before the
    /// controller has own samples.
    fn on_ack_end(&mut self, inflight: u64, rtt_floor: Duration);

    /// Congestion window in bytes.
    fn cwnd(&self) -> u64;

    /// Pacing rate in bytes per second.
    fn pacing_rate(&self) -> Bandwidth;

    fn min_rtt(&self) -> Duration;
}
