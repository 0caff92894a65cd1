//! Per-packet bandwidth sampling in the style of QUIC's delivery-rate
//! estimator: each sent packet snapshots the sampler totals, and each
//! acknowledgment yields `min(send_rate, ack_rate)`.

use std::time::{Duration, Instant};

/// Bandwidth in bytes per second.
pub type Bandwidth = u64;

pub const BANDWIDTH_INFINITE: Bandwidth = u64::MAX;

pub fn bandwidth_from_bytes_and_delta(bytes: u64, delta: Duration) -> Bandwidth {
    let micros = delta.as_micros() as u64;
    if micros == 0 {
        return BANDWIDTH_INFINITE;
    }
    bytes.saturating_mul(1_000_000) / micros
}

/// Sampler state attached to an outgoing packet at send time.
#[derive(Debug, Clone, Copy)]
pub struct PacketSample {
    pub total_sent: u64,
    pub total_acked: u64,
    pub total_lost: u64,
    pub is_app_limited: bool,
    pub size: u32,
    /// Total bytes sent at the most recently acknowledged packet.
    pub sent_at_last_ack: u64,
    /// Send time of the most recently acknowledged packet.
    pub last_ack_sent_time: Option<Instant>,
    /// Receive time of the most recent acknowledgment.
    pub last_ack_ack_time: Option<Instant>,
}

/// A finished bandwidth measurement handed to the congestion controller.
#[derive(Debug, Clone, Copy)]
pub struct BandwidthSample {
    pub bandwidth: Bandwidth,
    pub rtt: Duration,
    pub is_app_limited: bool,
}

#[derive(Debug)]
pub struct BandwidthSampler {
    total_sent: u64,
    total_acked: u64,
    total_lost: u64,
    last_acked_total_sent: u64,
    last_acked_sent_time: Option<Instant>,
    last_acked_ack_time: Option<Instant>,
    last_sent_pn: u64,
    end_of_app_limited: u64,
    is_app_limited: bool,
}

impl BandwidthSampler {
    pub fn new() -> Self {
        Self {
            total_sent: 0,
            total_acked: 0,
            total_lost: 0,
            last_acked_total_sent: 0,
            last_acked_sent_time: None,
            last_acked_ack_time: None,
            last_sent_pn: 0,
            end_of_app_limited: 0,
            // The connection starts app-limited until real traffic flows.
            is_app_limited: true,
        }
    }

    pub fn total_acked(&self) -> u64 {
        self.total_acked
    }

    pub fn total_lost(&self) -> u64 {
        self.total_lost
    }

    pub fn on_packet_sent(
        &mut self,
        pn: u64,
        size: u32,
        inflight: u64,
        sent_time: Instant,
    ) -> PacketSample {
        self.last_sent_pn = pn;
        self.total_sent += size as u64;

        // With nothing in flight this send becomes the reference point for
        // the next sample. That slightly under-estimates bandwidth but
        // provides samples at the start of the connection where none would
        // otherwise exist.
        if inflight == 0 {
            self.last_acked_ack_time = Some(sent_time);
            self.last_acked_sent_time = Some(sent_time);
            self.last_acked_total_sent = self.total_sent;
        }

        PacketSample {
            total_sent: self.total_sent,
            total_acked: self.total_acked,
            total_lost: self.total_lost,
            is_app_limited: self.is_app_limited,
            size,
            sent_at_last_ack: self.last_acked_total_sent,
            last_ack_sent_time: self.last_acked_sent_time,
            last_ack_ack_time: self.last_acked_ack_time,
        }
    }

    pub fn on_packet_acked(
        &mut self,
        pn: u64,
        sent_time: Instant,
        state: PacketSample,
        ack_time: Instant,
    ) -> Option<BandwidthSample> {
        self.total_acked += state.size as u64;
        self.last_acked_total_sent = state.total_sent;
        self.last_acked_sent_time = Some(sent_time);
        self.last_acked_ack_time = Some(ack_time);

        if self.is_app_limited && pn > self.end_of_app_limited {
            self.is_app_limited = false;
            tracing::debug!(pn, "exiting app-limited phase");
        }

        // No packet had been acknowledged when this one was sent; nothing to
        // measure against.
        let last_ack_sent_time = state.last_ack_sent_time?;
        let last_ack_ack_time = state.last_ack_ack_time?;

        // An infinite send rate means only the ack rate can be trusted.
        let send_rate = if sent_time > last_ack_sent_time {
            bandwidth_from_bytes_and_delta(
                state.total_sent - state.sent_at_last_ack,
                sent_time - last_ack_sent_time,
            )
        } else {
            BANDWIDTH_INFINITE
        };

        if ack_time <= last_ack_ack_time {
            return None;
        }
        let ack_rate = bandwidth_from_bytes_and_delta(
            self.total_acked - state.total_acked,
            ack_time - last_ack_ack_time,
        );

        Some(BandwidthSample {
            bandwidth: send_rate.min(ack_rate),
            rtt: ack_time.saturating_duration_since(sent_time),
            is_app_limited: state.is_app_limited,
        })
    }

    pub fn on_packet_lost(&mut self, size: u32) {
        self.total_lost += size as u64;
    }

    /// Marks the flow app-limited until everything sent so far is acked.
    pub fn on_app_limited(&mut self) {
        self.is_app_limited = true;
        self.end_of_app_limited = self.last_sent_pn;
    }
}

impl Default for BandwidthSampler {
    fn default() -> Self {
        Self::new()
    }
}
