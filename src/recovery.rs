//! Sender-side packet book-keeping: the unacked list, ACK processing with
//! reordering- and time-threshold loss detection, the PTO ladder, and the
//! receiver-side ACK tracker.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::StreamId;
use crate::congestion::{CongestionControl, PacketSample};
use crate::error::TransportError;
use crate::frame::{AckFrame, FrameType};
use crate::pool::{Pool, PoolRef};
use crate::ranges::RangeSet;
use crate::rtt::RttEstimator;

/// Flags of an outgoing packet record.
pub mod po_flags {
    /// Carries handshake CRYPTO material.
    pub const HELLO: u8 = 1 << 0;
    pub const ENCRYPTED: u8 = 1 << 1;
    pub const NO_ENCRYPT: u8 = 1 << 2;
    pub const MTU_PROBE: u8 = 1 << 3;
    /// Sitting in the unacked list.
    pub const UNACKED: u8 = 1 << 4;
    /// Sitting in the loss chain, awaiting frame re-queuing.
    pub const LOST: u8 = 1 << 5;
}

/// What a sent frame was about, enough to redo it after a loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentFrame {
    Stream {
        stream_id: StreamId,
        offset: u64,
        len: u16,
        fin: bool,
    },
    ResetStream {
        stream_id: StreamId,
    },
    MaxData,
    MaxStreamData {
        stream_id: StreamId,
    },
    Ack {
        largest: u64,
    },
    Ping,
    Crypto,
    PathChallenge {
        token: [u8; 8],
    },
    SessionToken,
    Other(FrameType),
}

/// Per-frame metadata of a sent packet: the frame's position in the packet
/// buffer and which stream (if any) owns its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMeta {
    pub frame: SentFrame,
    pub offset_in_packet: u16,
    pub length: u16,
}

pub type FrameMetaVec = SmallVec<[FrameMeta; 4]>;

/// An outgoing packet record, pool-allocated, alive from send until acked
/// or fully requeued after a loss.
#[derive(Debug)]
pub struct PacketOut {
    pub pn: u64,
    pub sent_time: Instant,
    pub size: u16,
    /// Bitmap over [`FrameType`] of everything the packet carried.
    pub frame_types: u32,
    pub flags: u8,
    pub frames: FrameMetaVec,
    pub ack_eliciting: bool,
    /// Bandwidth-sampler state; live for exactly as long as the packet is
    /// unacked.
    pub bw_state: Option<PacketSample>,
    pub next_in_loss_chain: Option<PoolRef>,
}

/// Result of feeding one ACK frame through the loss detector.
#[derive(Debug, Default)]
pub struct AckOutcome {
    /// Newly acknowledged packets, newest first.
    pub newly_acked: Vec<(u64, FrameMetaVec, u8)>,
    /// Packets moved onto the loss chain this round.
    pub lost: Vec<u64>,
    pub acked_bytes: u64,
    pub any_ack_eliciting_acked: bool,
}

#[derive(Debug)]
pub struct Recovery {
    pool: Pool<PacketOut>,
    /// Unacked ack-eliciting packets ordered by packet number.
    unacked: BTreeMap<u64, PoolRef>,
    loss_head: Option<PoolRef>,
    loss_tail: Option<PoolRef>,
    largest_acked: Option<u64>,
    bytes_in_flight: u64,
    /// Send time of the newest ack-eliciting packet.
    last_ack_eliciting_sent: Option<Instant>,
    pto_count: u32,
    reordering_threshold: u64,
}

impl Recovery {
    pub fn new(pool_size: usize, reordering_threshold: u8) -> Self {
        Self {
            pool: Pool::with_capacity(pool_size),
            unacked: BTreeMap::new(),
            loss_head: None,
            loss_tail: None,
            largest_acked: None,
            bytes_in_flight: 0,
            last_ack_eliciting_sent: None,
            pto_count: 0,
            reordering_threshold: reordering_threshold as u64,
        }
    }

    pub fn bytes_in_flight(&self) -> u64 {
        self.bytes_in_flight
    }

    pub fn largest_acked(&self) -> Option<u64> {
        self.largest_acked
    }

    pub fn pto_count(&self) -> u32 {
        self.pto_count
    }

    pub fn has_unacked(&self) -> bool {
        !self.unacked.is_empty()
    }

    pub fn pool_exhausted(&self) -> bool {
        self.pool.is_full()
    }

    /// Registers a sent ack-eliciting packet. Pool exhaustion fails the
    /// registration; the caller must stop producing new packets.
    pub fn on_packet_sent(&mut self, mut packet: PacketOut) -> Result<(), TransportError> {
        debug_assert!(packet.bw_state.is_some());
        packet.flags |= po_flags::UNACKED;
        let pn = packet.pn;
        let size = packet.size as u64;
        let eliciting = packet.ack_eliciting;
        let sent_time = packet.sent_time;
        let Some(id) = self.pool.insert(packet) else {
            warn!(pn, "packet pool exhausted");
            return Err(TransportError::Internal);
        };
        self.unacked.insert(pn, id);
        self.bytes_in_flight += size;
        if eliciting {
            self.last_ack_eliciting_sent = Some(sent_time);
        }
        Ok(())
    }

    /// Processes an ACK frame: marks packets acked (newest first), feeds
    /// the congestion controller and RTT estimator, and queues losses.
    pub fn on_ack_frame(
        &mut self,
        ack: &AckFrame,
        now: Instant,
        rtt: &mut RttEstimator,
        cc: &mut impl CongestionControl,
    ) -> Result<AckOutcome, TransportError> {
        let runs = ack.runs()?;
        let mut outcome = AckOutcome::default();

        cc.on_ack_begin(now, self.bytes_in_flight);

        // Walk acknowledged runs from the newest down so the unacked list
        // stays ordered while we drain it.
        for &(high, low) in &runs {
            let acked_ids: Vec<(u64, PoolRef)> = self
                .unacked
                .range(low..=high)
                .rev()
                .map(|(&pn, &id)| (pn, id))
                .collect();
            for (pn, id) in acked_ids {
                self.unacked.remove(&pn);
                let mut packet = self.pool.remove(id).expect("unacked entry is pooled");
                packet.flags &= !po_flags::UNACKED;
                self.bytes_in_flight = self.bytes_in_flight.saturating_sub(packet.size as u64);

                // RTT is sampled from the largest-acked packet only.
                if pn == ack.largest && packet.ack_eliciting {
                    let delay = Duration::from_millis(ack.delay_ms as u64);
                    let sample = now
                        .saturating_duration_since(packet.sent_time)
                        .saturating_sub(delay);
                    rtt.update(sample);
                }

                if let Some(state) = packet.bw_state.take() {
                    cc.on_packet_acked(pn, packet.sent_time, state, now);
                } else {
                    // Sampler state missing is a skipped sample, not an error.
                    debug_assert!(false, "unacked packet without sampler state");
                }

                outcome.acked_bytes += packet.size as u64;
                outcome.any_ack_eliciting_acked |= packet.ack_eliciting;
                outcome
                    .newly_acked
                    .push((pn, std::mem::take(&mut packet.frames), packet.flags));
            }
        }

        if self
            .largest_acked
            .is_none_or(|largest| ack.largest > largest)
        {
            self.largest_acked = Some(ack.largest);
        }

        self.detect_losses(now, rtt, cc, &mut outcome);

        cc.on_ack_end(self.bytes_in_flight, rtt.min_rtt());

        if outcome.any_ack_eliciting_acked {
            self.pto_count = 0;
        }
        Ok(outcome)
    }

    /// A packet below the largest acked is lost when it trails by more than
    /// the reordering threshold or has outlived `max(9/8 srtt, 1 ms)`.
    fn detect_losses(
        &mut self,
        now: Instant,
        rtt: &RttEstimator,
        cc: &mut impl CongestionControl,
        outcome: &mut AckOutcome,
    ) {
        let Some(largest_acked) = self.largest_acked else {
            return;
        };
        let loss_delay = rtt.srtt().mul_f32(9.0 / 8.0).max(Duration::from_millis(1));

        let lost_ids: Vec<(u64, PoolRef)> = self
            .unacked
            .range(..largest_acked)
            .filter(|&(&pn, &id)| {
                let too_old = self
                    .pool
                    .get(id)
                    .is_some_and(|p| now.saturating_duration_since(p.sent_time) >= loss_delay);
                largest_acked - pn >= self.reordering_threshold || too_old
            })
            .map(|(&pn, &id)| (pn, id))
            .collect();

        for (pn, id) in lost_ids {
            self.unacked.remove(&pn);
            let packet = self.pool.get_mut(id).expect("unacked entry is pooled");
            packet.flags = (packet.flags & !po_flags::UNACKED) | po_flags::LOST;
            packet.next_in_loss_chain = None;
            self.bytes_in_flight = self.bytes_in_flight.saturating_sub(packet.size as u64);

            let state = packet.bw_state.take();
            let is_probe = packet.flags & po_flags::MTU_PROBE != 0;
            if let Some(state) = state
                // An MTU probe was expected to die; it is not a congestion
                // signal.
                && !is_probe
            {
                cc.on_packet_lost(pn, state);
            }

            debug!(pn, "packet declared lost");
            self.push_loss_chain(id);
            outcome.lost.push(pn);
        }
    }

    fn push_loss_chain(&mut self, id: PoolRef) {
        match self.loss_tail {
            Some(tail) => {
                self.pool
                    .get_mut(tail)
                    .expect("loss chain tail is pooled")
                    .next_in_loss_chain = Some(id);
            }
            None => self.loss_head = Some(id),
        }
        self.loss_tail = Some(id);
    }

    /// Pops the oldest lost packet, releasing its pool slot. The caller
    /// re-queues its frames on the owning streams.
    pub fn pop_lost(&mut self) -> Option<PacketOut> {
        let id = self.loss_head?;
        let packet = self.pool.remove(id).expect("loss chain head is pooled");
        self.loss_head = packet.next_in_loss_chain;
        if self.loss_head.is_none() {
            self.loss_tail = None;
        }
        Some(packet)
    }

    pub fn has_lost(&self) -> bool {
        self.loss_head.is_some()
    }

    /// When the probe timer would fire: PTO after the newest ack-eliciting
    /// send, doubled per consecutive firing.
    pub fn pto_deadline(&self, rtt: &RttEstimator, max_ack_delay: Duration) -> Option<Instant> {
        if self.unacked.is_empty() {
            return None;
        }
        let base = self.last_ack_eliciting_sent?;
        let pto = rtt.pto(max_ack_delay) * (1 << self.pto_count.min(6));
        Some(base + pto)
    }

    /// Registers a PTO firing and reports the new consecutive count.
    pub fn on_pto_fired(&mut self, now: Instant) -> u32 {
        self.pto_count += 1;
        // Push the ladder forward so the next deadline doubles from now.
        self.last_ack_eliciting_sent = Some(now);
        trace!(count = self.pto_count, "probe timeout fired");
        self.pto_count
    }

    /// Drops every outstanding record, returning their frame metadata so
    /// streams can settle state (used on teardown).
    pub fn drain(&mut self) -> Vec<(u64, FrameMetaVec)> {
        let mut out = Vec::new();
        let ids: Vec<(u64, PoolRef)> = self.unacked.iter().map(|(&pn, &id)| (pn, id)).collect();
        for (pn, id) in ids {
            if let Some(mut packet) = self.pool.remove(id) {
                out.push((pn, std::mem::take(&mut packet.frames)));
            }
        }
        self.unacked.clear();
        while let Some(packet) = self.pop_lost() {
            out.push((packet.pn, packet.frames));
        }
        self.bytes_in_flight = 0;
        out
    }

    /// Iterates unacked packet numbers in ascending order (test support).
    pub fn unacked_pns(&self) -> impl Iterator<Item = u64> + '_ {
        self.unacked.keys().copied()
    }
}

/// Receiver-side tracker deciding when to emit ACK frames and with what
/// ranges.
#[derive(Debug)]
pub struct AckTracker {
    received: RangeSet,
    largest: Option<u64>,
    largest_recv_time: Option<Instant>,
    ack_eliciting_pending: u32,
    /// Arrival time of the oldest unacknowledged ack-eliciting packet.
    oldest_pending: Option<Instant>,
    /// Out-of-order arrival was observed; acknowledge immediately.
    immediate: bool,
    ack_eliciting_threshold: u8,
    max_ack_delay: Duration,
    /// Highest ACK_FREQUENCY sequence number applied so far.
    frequency_seq: Option<u8>,
}

impl AckTracker {
    pub fn new(ack_eliciting_threshold: u8, max_ack_delay: Duration) -> Self {
        Self {
            received: RangeSet::new(),
            largest: None,
            largest_recv_time: None,
            ack_eliciting_pending: 0,
            oldest_pending: None,
            immediate: false,
            ack_eliciting_threshold,
            max_ack_delay,
            frequency_seq: None,
        }
    }

    pub fn highest_received(&self) -> Option<u64> {
        self.largest
    }

    /// Records an accepted packet. Returns false for duplicates, which the
    /// caller must drop without processing.
    pub fn on_packet_received(&mut self, pn: u64, ack_eliciting: bool, now: Instant) -> bool {
        if !self.received.insert_value(pn) {
            return false;
        }
        if self.largest.is_none_or(|l| pn > l) {
            self.largest = Some(pn);
            self.largest_recv_time = Some(now);
        } else {
            // Filling a gap means the peer is probably retransmitting;
            // answer without delay.
            self.immediate = true;
        }
        if ack_eliciting {
            self.ack_eliciting_pending += 1;
            self.oldest_pending.get_or_insert(now);
        }
        true
    }

    pub fn should_send_ack(&self, now: Instant) -> bool {
        if self.ack_eliciting_pending == 0 {
            return false;
        }
        self.immediate
            || self.ack_eliciting_pending >= self.ack_eliciting_threshold as u32
            || self
                .oldest_pending
                .is_some_and(|oldest| now.saturating_duration_since(oldest) >= self.max_ack_delay)
    }

    /// Deadline at which a delayed ACK must go out.
    pub fn next_ack_time(&self) -> Option<Instant> {
        if self.ack_eliciting_pending == 0 {
            return None;
        }
        self.oldest_pending.map(|oldest| oldest + self.max_ack_delay)
    }

    /// Builds the ACK frame for everything received so far.
    pub fn build_ack(&self, now: Instant) -> Option<AckFrame> {
        let largest = self.largest?;
        let delay = self
            .largest_recv_time
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default();

        let mut runs: Vec<(u64, u64)> = self.received.iter().map(|(s, e)| (e, s)).collect();
        runs.reverse();
        debug_assert_eq!(runs.first().map(|r| r.0), Some(largest));
        // The wire format caps the range count; drop the oldest runs first.
        runs.truncate(1 + u8::MAX as usize);

        let mut ack = AckFrame::from_runs(delay.as_millis().min(u16::MAX as u128) as u16, &runs);
        debug_assert!(ack.ranges.len() <= u8::MAX as usize);
        ack.ranges.shrink_to_fit();
        Some(ack)
    }

    pub fn on_ack_sent(&mut self) {
        self.ack_eliciting_pending = 0;
        self.oldest_pending = None;
        self.immediate = false;
    }

    /// The peer acknowledged an ACK of ours up to `largest`: ranges far
    /// below it are no longer needed, keep a duplicate-detection margin.
    pub fn on_ack_acked(&mut self, largest: u64) {
        self.received.remove_below(largest.saturating_sub(1024));
    }

    /// Locally configured ACK policy; a peer ACK_FREQUENCY, once seen,
    /// takes precedence.
    pub fn set_local_policy(&mut self, ack_eliciting_threshold: u8, max_ack_delay: Duration) {
        if self.frequency_seq.is_none() {
            self.ack_eliciting_threshold = ack_eliciting_threshold;
            self.max_ack_delay = max_ack_delay;
        }
    }

    /// Applies ACK_FREQUENCY, keeping only the highest sequence number.
    pub fn on_ack_frequency(
        &mut self,
        seq: u8,
        ack_eliciting_threshold: u8,
        max_ack_delay_ms: u32,
    ) -> bool {
        if self.frequency_seq.is_some_and(|cur| seq <= cur) {
            return false;
        }
        self.frequency_seq = Some(seq);
        self.ack_eliciting_threshold = ack_eliciting_threshold;
        self.max_ack_delay = Duration::from_millis(max_ack_delay_ms as u64);
        true
    }

    pub fn max_ack_delay(&self) -> Duration {
        self.max_ack_delay
    }
}

/// Convenience for tests: reconstructs the acked packet set of an ACK.
pub fn ack_to_pns(ack: &AckFrame) -> Result<Vec<u64>, TransportError> {
    let mut pns = Vec::new();
    for (high, low) in ack.runs()? {
        let mut pn = high + 1;
        while pn > low {
            pn -= 1;
            pns.push(pn);
        }
    }
    Ok(pns)
}
