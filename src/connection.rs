//! A single connection: handshake and close state machine, frame dispatch,
//! and the packet scheduler that turns stream bytes into sealed datagrams.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use tracing::{debug, trace, warn};

use crate::config::{Config, MIN_MSS, PROTOCOL_VERSION};
use crate::congestion::{Bbr, CongestionControl};
use crate::crypto::{Handshake, KeyPair};
use crate::error::TransportError;
use crate::frame::{AckFrame, Frame, FrameType, StreamFrame};
use crate::mtu::MtuProber;
use crate::packet::{
    AEAD_TAG_LEN, FLAG_HELLO, PacketHeader, expand_packet_number, packet_number_len,
    truncate_packet_number,
};
use crate::path::PathValidator;
use crate::recovery::{AckTracker, FrameMeta, FrameMetaVec, PacketOut, Recovery, SentFrame, po_flags};
use crate::rtt::RttEstimator;
use crate::scheduler::StreamScheduler;
use crate::stream::{Stream, StreamChunk};
use crate::{ConnectionEvent, StreamId};

/// Consecutive AEAD open failures that silently kill the connection.
const MAX_AEAD_FAILURES: u32 = 3;
/// STREAM frame header: type, stream id, flags, offset, length.
const STREAM_FRAME_OVERHEAD: usize = 1 + 2 + 1 + 8 + 2;
/// Minimum encoded size of a PADDING frame.
const PADDING_FRAME_MIN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    WaitSendInitial,
    InitialSent,
    Wait0Rtt,
    Connected,
    CloseSent,
    CloseReceived,
    PtoTimedWait,
}

/// Transport counters exposed through `Connection::stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub ping_count: u64,
    pub pong_count: u64,
    pub tx_bytes: u64,
    pub rtx_bytes: u64,
    pub acked_bytes: u64,
    pub srtt: Duration,
    pub rttvar: Duration,
    pub rto: Duration,
}

pub struct Connection {
    pub(crate) local_cid: u32,
    peer_cid: u32,
    is_initiator: bool,
    state: ConnState,
    config: Config,

    handshake: Option<Handshake>,
    keys: Option<KeyPair>,
    aead_failures: u32,
    /// Resumption token offered on connect (client side).
    offered_token: Option<[u8; 32]>,
    /// Responder owes the peer a CRYPTO reply.
    pending_crypto: bool,
    /// Responder owes the peer a SESSION_TOKEN.
    pending_session_token: bool,

    next_pn: u64,
    recovery: Recovery,
    ack_tracker: AckTracker,
    rtt: RttEstimator,
    cc: Bbr,
    mtu: MtuProber,
    path: PathValidator,

    streams: BTreeMap<u16, Stream>,
    scheduler: StreamScheduler,
    next_stream_id: u16,
    /// Streams the peer may have open at once.
    max_streams_local: u16,
    /// Streams the peer allows us.
    max_streams_peer: u16,
    peer_streams_seen: u16,
    pending_max_streams: bool,

    /// Connection credit the peer gave us (absolute).
    max_data_peer: u64,
    /// Connection credit we advertised (absolute).
    max_data_local: u64,
    /// New stream bytes we have placed into packets.
    conn_bytes_sent: u64,
    /// Highest-offset sum received across streams, checked against
    /// `max_data_local`.
    conn_bytes_received: u64,
    /// Stream bytes handed to the application.
    conn_bytes_delivered: u64,
    pending_max_data: bool,
    /// Blocked on connection credit at this limit; emit BLOCKED once.
    pending_blocked: Option<u64>,
    /// The limit BLOCKED was last reported for, to avoid repeats.
    blocked_reported_at: Option<u64>,

    close_error: Option<TransportError>,
    close_reason: String,
    pending_close: bool,
    close_resends_left: u32,
    closed_event_sent: bool,
    drain_deadline: Option<Instant>,

    idle_deadline: Instant,
    handshake_deadline: Option<Instant>,
    handshake_retries_left: u32,

    keepalive_deadline: Option<Instant>,
    keepalive_strikes: u32,
    pending_ping: bool,

    /// Pacing: the instant the next packet may leave.
    next_send_time: Instant,
    app_limited: bool,

    events: VecDeque<ConnectionEvent>,
    stats: ConnectionStats,
    rng: StdRng,
}

impl Connection {
    pub(crate) fn new_initiator(
        local_cid: u32,
        peer_addr: SocketAddr,
        config: Config,
        token: Option<[u8; 32]>,
        mut rng: StdRng,
        now: Instant,
    ) -> Self {
        let handshake = Handshake::new(&mut rng);
        let mut conn = Self::new_common(local_cid, 0, peer_addr, config, true, rng, now);
        conn.handshake = Some(handshake);
        conn.offered_token = token;
        conn.state = ConnState::WaitSendInitial;
        conn
    }

    /// Builds the responder side from the CRYPTO material of a valid
    /// Initial packet. Keys exist immediately; the CRYPTO reply and a fresh
    /// session token are queued.
    pub(crate) fn new_responder(
        local_cid: u32,
        peer_cid: u32,
        peer_addr: SocketAddr,
        config: Config,
        peer_random: [u8; 16],
        peer_public: [u8; 32],
        initial_pn: u64,
        initial_size: usize,
        mut rng: StdRng,
        now: Instant,
    ) -> Self {
        let handshake = Handshake::new(&mut rng);
        let keys = handshake.derive(&peer_public, &peer_random, false);
        let mut conn = Self::new_common(local_cid, peer_cid, peer_addr, config, false, rng, now);
        conn.handshake = Some(handshake);
        conn.keys = Some(keys);
        conn.state = ConnState::Connected;
        conn.pending_crypto = true;
        conn.pending_session_token = true;
        conn.ack_tracker.on_packet_received(initial_pn, true, now);
        conn.path.on_bytes_received(initial_size);
        conn.events.push_back(ConnectionEvent::Connected);
        conn
    }

    fn new_common(
        local_cid: u32,
        peer_cid: u32,
        peer_addr: SocketAddr,
        config: Config,
        is_initiator: bool,
        rng: StdRng,
        now: Instant,
    ) -> Self {
        use rand::{RngCore, SeedableRng};
        let mut rng = rng;
        let cc_rng = StdRng::seed_from_u64(rng.next_u64());
        let mtu = MtuProber::new(&config);
        let mss = mtu.mss();
        Self {
            local_cid,
            peer_cid,
            is_initiator,
            state: ConnState::Disconnected,
            handshake: None,
            keys: None,
            aead_failures: 0,
            offered_token: None,
            pending_crypto: false,
            pending_session_token: false,
            next_pn: 0,
            recovery: Recovery::new(config.packet_pool_size, config.reordering_threshold),
            ack_tracker: AckTracker::new(config.ack_eliciting_threshold, config.max_ack_delay),
            rtt: RttEstimator::new(config.initial_rto),
            cc: Bbr::new(mss, cc_rng),
            mtu,
            path: PathValidator::new(peer_addr),
            streams: BTreeMap::new(),
            scheduler: StreamScheduler::new(mss),
            next_stream_id: if is_initiator { 1 } else { 2 },
            max_streams_local: config.max_streams,
            max_streams_peer: config.max_streams,
            peer_streams_seen: 0,
            pending_max_streams: false,
            max_data_peer: config.initial_max_data,
            max_data_local: config.initial_max_data,
            conn_bytes_sent: 0,
            conn_bytes_received: 0,
            conn_bytes_delivered: 0,
            pending_max_data: false,
            pending_blocked: None,
            blocked_reported_at: None,
            close_error: None,
            close_reason: String::new(),
            pending_close: false,
            close_resends_left: config.close_retries,
            closed_event_sent: false,
            drain_deadline: None,
            idle_deadline: now + config.idle_timeout,
            handshake_deadline: None,
            handshake_retries_left: config.handshake_retries,
            keepalive_deadline: None,
            keepalive_strikes: 0,
            pending_ping: false,
            next_send_time: now,
            app_limited: true,
            events: VecDeque::new(),
            stats: ConnectionStats::default(),
            config,
            rng,
        }
    }

    // ------------------------------------------------------------------
    // Public surface
    // ------------------------------------------------------------------

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Disconnected
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.path.addr()
    }

    pub fn local_cid(&self) -> u32 {
        self.local_cid
    }

    /// Effective maximum segment size (from the MTU prober).
    pub fn mss(&self) -> usize {
        self.mtu.mss()
    }

    pub fn stats(&self) -> ConnectionStats {
        let mut stats = self.stats;
        stats.srtt = self.rtt.srtt();
        stats.rttvar = self.rtt.rttvar();
        stats.rto = self.rtt.rto(self.config.min_rto(), self.config.max_rto);
        stats
    }

    pub fn poll_event(&mut self) -> Option<ConnectionEvent> {
        self.events.pop_front()
    }

    pub fn create_stream(&mut self) -> Result<StreamId, TransportError> {
        if self.state != ConnState::Connected {
            return Err(TransportError::StreamStateError);
        }
        let ours = self
            .streams
            .keys()
            .filter(|id| (*id % 2 == 1) == self.is_initiator)
            .count();
        if ours as u16 >= self.max_streams_peer {
            return Err(TransportError::StreamLimitError);
        }
        let id = StreamId(self.next_stream_id);
        self.next_stream_id = self
            .next_stream_id
            .checked_add(2)
            .ok_or(TransportError::StreamLimitError)?;
        self.insert_stream(id);
        Ok(id)
    }

    fn insert_stream(&mut self, id: StreamId) {
        let stream = Stream::new(
            id,
            self.config.initial_max_stream_data,
            self.config.initial_max_stream_data,
        );
        self.streams.insert(id.0, stream);
        self.scheduler.register(id, 1);
    }

    /// Applies a partial configuration update; unset fields keep their
    /// current values.
    pub fn reconfigure(&mut self, update: &crate::config::ConfigUpdate) {
        self.config.apply(update);
        self.ack_tracker.set_local_policy(
            self.config.ack_eliciting_threshold,
            self.config.max_ack_delay,
        );
    }

    /// Sets the scheduling weight of a stream.
    pub fn set_stream_weight(&mut self, id: StreamId, weight: u8) -> Result<(), TransportError> {
        if !self.streams.contains_key(&id.0) {
            return Err(TransportError::StreamNotFound);
        }
        self.scheduler.register(id, weight);
        Ok(())
    }

    pub fn write(&mut self, id: StreamId, data: &[u8]) -> Result<usize, TransportError> {
        if !matches!(self.state, ConnState::Connected) {
            return Err(TransportError::StreamClosed);
        }
        let limit = self.config.stream_send_buffer;
        let stream = self
            .streams
            .get_mut(&id.0)
            .ok_or(TransportError::StreamNotFound)?;
        stream.write(data, limit)
    }

    /// Reads the contiguous prefix available on a stream. The bool reports
    /// FIN.
    pub fn read(&mut self, id: StreamId) -> Result<(Vec<u8>, bool), TransportError> {
        let stream = self
            .streams
            .get_mut(&id.0)
            .ok_or(TransportError::StreamNotFound)?;
        let (data, fin) = stream.read()?;
        self.conn_bytes_delivered += data.len() as u64;

        // Refill the connection-level credit once half is consumed.
        let window = self.config.initial_max_data;
        if self.max_data_local - self.conn_bytes_delivered < window / 2 {
            self.max_data_local = self.conn_bytes_delivered + window;
            self.pending_max_data = true;
        }
        self.drop_stream_if_done(id);
        Ok((data, fin))
    }

    pub fn finish_stream(&mut self, id: StreamId) -> Result<(), TransportError> {
        self.streams
            .get_mut(&id.0)
            .ok_or(TransportError::StreamNotFound)?
            .finish()
    }

    pub fn reset_stream(&mut self, id: StreamId, error_code: u16) -> Result<(), TransportError> {
        self.streams
            .get_mut(&id.0)
            .ok_or(TransportError::StreamNotFound)?
            .reset(error_code)
    }

    pub fn stream_readable(&self, id: StreamId) -> bool {
        self.streams.get(&id.0).is_some_and(|s| s.readable())
    }

    /// Begins a graceful close. Idempotent; the connection drains for
    /// three PTOs before releasing its CID.
    pub fn close(&mut self, error: TransportError, reason: &str, now: Instant) {
        match self.state {
            ConnState::Disconnected
            | ConnState::CloseSent
            | ConnState::CloseReceived
            | ConnState::PtoTimedWait => {}
            ConnState::WaitSendInitial | ConnState::InitialSent | ConnState::Wait0Rtt => {
                // Cancelling a connect sends nothing; state is freed when
                // the handshake timer expires so forged Initials cannot
                // exhaust us.
                self.close_error = Some(TransportError::Cancelled);
                self.state = ConnState::PtoTimedWait;
                self.drain_deadline = Some(
                    self.handshake_deadline
                        .unwrap_or_else(|| now + self.config.handshake_timeout),
                );
            }
            ConnState::Connected => {
                self.close_error = Some(error);
                self.close_reason = reason.to_string();
                self.state = ConnState::CloseSent;
                self.pending_close = true;
                self.arm_drain(now);
            }
        }
    }

    /// Immediate teardown: one CONNECTION_CLOSE, no drain on our side.
    pub fn shutdown(&mut self, now: Instant) {
        if matches!(self.state, ConnState::Connected | ConnState::CloseSent) {
            self.close_error = Some(TransportError::Cancelled);
            self.pending_close = true;
            self.state = ConnState::PtoTimedWait;
            self.drain_deadline = Some(now);
        } else if self.state != ConnState::Disconnected {
            self.enter_disconnected(TransportError::Cancelled);
        }
    }

    fn arm_drain(&mut self, now: Instant) {
        let pto = self.rtt.pto(self.ack_tracker.max_ack_delay());
        self.drain_deadline = Some(now + 3 * pto);
    }

    fn enter_disconnected(&mut self, error: TransportError) {
        if self.state == ConnState::Disconnected {
            return;
        }
        debug!(cid = self.local_cid, ?error, "connection disconnected");
        self.state = ConnState::Disconnected;
        let drained = self.recovery.drain();
        trace!(packets = drained.len(), "released in-flight state");
        self.emit_closed(error);
    }

    fn emit_closed(&mut self, error: TransportError) {
        if !self.closed_event_sent {
            self.closed_event_sent = true;
            self.events.push_back(ConnectionEvent::Closed(error));
        }
    }

    // ------------------------------------------------------------------
    // Receive path
    // ------------------------------------------------------------------

    /// Feeds one decrypted-or-plaintext packet into the connection.
    /// `datagram` is the whole UDP payload; the header was already parsed.
    pub(crate) fn handle_packet(
        &mut self,
        header: &PacketHeader,
        datagram: &[u8],
        header_len: usize,
        from: SocketAddr,
        now: Instant,
    ) {
        if self.state == ConnState::Disconnected {
            return;
        }
        if header.version != PROTOCOL_VERSION {
            warn!(version = header.version, "peer speaks a different version");
            self.close(TransportError::VersionMismatch, "version mismatch", now);
            return;
        }

        let payload_end = header_len + header.payload_len as usize;
        if datagram.len() < payload_end {
            return;
        }
        let sealed = &datagram[header_len..payload_end];

        let pn = expand_packet_number(
            header.pn_truncated,
            header.pn_len,
            self.ack_tracker.highest_received(),
        );

        let plaintext;
        if header.flags & FLAG_HELLO != 0 {
            plaintext = sealed.to_vec();
        } else {
            let Some(keys) = &self.keys else {
                trace!(pn, "sealed packet before keys exist");
                return;
            };
            match keys.recv.open(pn, &datagram[..header_len], sealed) {
                Ok(p) => {
                    self.aead_failures = 0;
                    plaintext = p;
                }
                Err(_) => {
                    self.aead_failures += 1;
                    warn!(
                        pn,
                        failures = self.aead_failures,
                        "AEAD open failed"
                    );
                    if self.aead_failures >= MAX_AEAD_FAILURES {
                        // Silent close: nothing goes on the wire.
                        self.enter_disconnected(TransportError::Internal);
                    }
                    return;
                }
            }
        }

        // Learn the responder's CID from its first reply.
        if self.peer_cid == 0 && header.scid != 0 {
            self.peer_cid = header.scid;
        }

        let mut frames = Vec::new();
        let mut cursor = 0usize;
        while cursor < plaintext.len() {
            match Frame::decode(&plaintext[cursor..]) {
                Ok((frame, used)) => {
                    frames.push(frame);
                    cursor += used;
                }
                Err(err) => {
                    warn!(pn, ?err, "malformed frame");
                    self.close(TransportError::FrameFormat, "malformed frame", now);
                    return;
                }
            }
        }

        let ack_eliciting = frames.iter().any(Frame::is_ack_eliciting);
        if !self.ack_tracker.on_packet_received(pn, ack_eliciting, now) {
            trace!(pn, "duplicate packet dropped");
            return;
        }

        self.idle_deadline = now + self.config.idle_timeout;
        if self.state == ConnState::Connected && from != self.path.addr() {
            self.path.on_peer_address(from, &mut self.rng);
        }
        self.path.on_bytes_received(datagram.len());

        // While closing, remind the peer a bounded number of times.
        if matches!(self.state, ConnState::CloseSent | ConnState::CloseReceived)
            && !self.pending_close
            && self.close_resends_left > 0
        {
            self.close_resends_left -= 1;
            self.pending_close = true;
        }

        for frame in frames {
            self.handle_frame(frame, now);
            if self.state == ConnState::Disconnected {
                return;
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame, now: Instant) {
        match frame {
            Frame::Crypto { random, data } => self.on_crypto(random, data, now),
            Frame::Ack(ack) => self.on_ack(&ack, now),
            Frame::Stream(frame) => self.on_stream(frame, now),
            Frame::Padding { .. } => {}
            Frame::Ping => {
                self.stats.pong_count += 1;
            }
            Frame::ConnectionClose { error_code, reason } => {
                self.on_connection_close(error_code, &reason, now);
            }
            Frame::ResetStream {
                stream_id,
                error_code,
                final_offset,
            } => {
                if let Some(stream) = self.streams.get_mut(&stream_id.0) {
                    match stream.on_reset_stream(error_code, final_offset) {
                        Ok(()) => self
                            .events
                            .push_back(ConnectionEvent::StreamReset(stream_id, error_code)),
                        Err(err) => self.close(err, "invalid RESET_STREAM", now),
                    }
                }
            }
            Frame::MaxData { maximum_data } => {
                // Absolute offset; duplicates and stale values are no-ops.
                if maximum_data > self.max_data_peer {
                    self.max_data_peer = maximum_data;
                    self.notify_writable_all();
                }
            }
            Frame::MaxStreamData {
                stream_id,
                maximum_stream_data,
            } => {
                if let Some(stream) = self.streams.get_mut(&stream_id.0) {
                    let before = stream.peer_max_data();
                    stream.on_max_stream_data(maximum_stream_data);
                    if stream.peer_max_data() > before {
                        self.events
                            .push_back(ConnectionEvent::StreamWritable(stream_id));
                    }
                }
            }
            Frame::MaxStreams {
                unidirectional,
                maximum,
            } => {
                if !unidirectional && maximum > self.max_streams_peer {
                    self.max_streams_peer = maximum;
                }
            }
            Frame::Blocked { .. } => {
                // The peer thinks it is out of connection credit; make sure
                // our latest limit is on the wire.
                self.pending_max_data = true;
            }
            Frame::StreamBlocked { stream_id, .. } => {
                // The peer believes it is starved on this stream; put our
                // current limit back on the wire.
                if let Some(stream) = self.streams.get_mut(&stream_id.0) {
                    stream.on_max_stream_data_lost();
                }
            }
            Frame::PathChallenge { token } => self.path.on_path_challenge(token),
            Frame::PathResponse { token } => {
                self.path.on_path_response(token);
            }
            Frame::SessionToken {
                effective_secs,
                token,
            } => {
                let secs = if effective_secs == 0 {
                    u16::MAX
                } else {
                    effective_secs
                };
                self.events.push_back(ConnectionEvent::SessionToken {
                    token,
                    lifetime: Duration::from_secs(secs as u64),
                });
            }
            Frame::AckFrequency {
                seq,
                ack_eliciting_threshold,
                reordering_threshold: _,
                max_ack_delay_ms,
            } => {
                self.ack_tracker
                    .on_ack_frequency(seq, ack_eliciting_threshold, max_ack_delay_ms);
            }
            Frame::Version { version } => {
                if version != PROTOCOL_VERSION {
                    self.close(TransportError::VersionMismatch, "unsupported version", now);
                }
            }
        }
    }

    fn on_crypto(&mut self, random: [u8; 16], data: [u8; 32], _now: Instant) {
        match self.state {
            ConnState::InitialSent | ConnState::WaitSendInitial | ConnState::Wait0Rtt => {
                let handshake = self.handshake.take().expect("initiator keeps its handshake");
                self.keys = Some(handshake.derive(&data, &random, true));
                self.state = ConnState::Connected;
                self.handshake_deadline = None;
                debug!(cid = self.local_cid, "handshake complete");
                self.events.push_back(ConnectionEvent::Connected);
            }
            ConnState::Connected if !self.is_initiator => {
                // Retransmitted Initial: our CRYPTO reply was lost.
                self.pending_crypto = true;
            }
            _ => {}
        }
    }

    fn on_ack(&mut self, ack: &AckFrame, now: Instant) {
        let outcome = match self.recovery.on_ack_frame(ack, now, &mut self.rtt, &mut self.cc) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.close(err, "malformed ACK ranges", now);
                return;
            }
        };

        self.stats.acked_bytes += outcome.acked_bytes;
        if outcome.any_ack_eliciting_acked {
            self.keepalive_strikes = 0;
            if self.config.keepalive {
                self.keepalive_deadline = Some(now + self.config.keepalive_interval);
            }
        }

        let mut writable: BTreeSet<u16> = BTreeSet::new();
        for (pn, frames, flags) in &outcome.newly_acked {
            if flags & po_flags::MTU_PROBE != 0
                && let Some(mss) = self.mtu.on_probe_acked(*pn)
            {
                self.install_mss(mss);
            }
            for meta in frames {
                match &meta.frame {
                    SentFrame::Stream {
                        stream_id,
                        offset,
                        len,
                        fin,
                    } => {
                        if let Some(stream) = self.streams.get_mut(&stream_id.0) {
                            stream.on_chunk_acked(*offset, *len as usize, *fin);
                            writable.insert(stream_id.0);
                        }
                    }
                    SentFrame::ResetStream { stream_id } => {
                        if let Some(stream) = self.streams.get_mut(&stream_id.0) {
                            stream.on_reset_acked();
                        }
                    }
                    SentFrame::Ack { largest } => self.ack_tracker.on_ack_acked(*largest),
                    SentFrame::Crypto => self.pending_crypto = false,
                    SentFrame::SessionToken => self.pending_session_token = false,
                    SentFrame::MaxData
                    | SentFrame::MaxStreamData { .. }
                    | SentFrame::Ping
                    | SentFrame::PathChallenge { .. }
                    | SentFrame::Other(_) => {}
                }
            }
        }

        for id in writable {
            let stream_id = StreamId(id);
            self.events
                .push_back(ConnectionEvent::StreamWritable(stream_id));
            self.drop_stream_if_done(stream_id);
        }
    }

    fn on_stream(&mut self, frame: StreamFrame, now: Instant) {
        if !matches!(self.state, ConnState::Connected) {
            return;
        }
        let id = frame.stream_id;

        if !self.streams.contains_key(&id.0) {
            // Peer-initiated stream: its parity is the opposite of ours.
            let peer_parity = if self.is_initiator { 0 } else { 1 };
            if id.0 % 2 != peer_parity {
                // Data for a stream of ours that no longer exists.
                trace!(stream = %id, "frame for a forgotten local stream");
                return;
            }
            if self.peer_streams_seen >= self.max_streams_local {
                self.close(TransportError::StreamLimitError, "too many streams", now);
                return;
            }
            self.peer_streams_seen += 1;
            self.insert_stream(id);
            self.events.push_back(ConnectionEvent::StreamOpened(id));
        }

        // Connection-level flow control is charged on highest-offset
        // growth, not on bytes stored.
        let stream = self.streams.get_mut(&id.0).expect("just inserted");
        let before = stream.recv_highest();
        match stream.on_stream_frame(frame.offset, &frame.data, frame.fin) {
            Ok(became_readable) => {
                let advance = stream.recv_highest().saturating_sub(before);
                self.conn_bytes_received += advance;
                if self.conn_bytes_received > self.max_data_local {
                    self.close(
                        TransportError::FlowControlViolation,
                        "connection flow control exceeded",
                        now,
                    );
                    return;
                }
                if became_readable {
                    self.events.push_back(ConnectionEvent::StreamReadable(id));
                }
            }
            Err(err) => self.close(err, "stream error", now),
        }
    }

    fn on_connection_close(&mut self, error_code: u16, reason: &str, now: Instant) {
        let error = TransportError::from_code(error_code);
        debug!(cid = self.local_cid, ?error, reason, "peer closed connection");
        match self.state {
            ConnState::Connected
            | ConnState::InitialSent
            | ConnState::WaitSendInitial
            | ConnState::Wait0Rtt => {
                self.close_error = Some(error);
                self.state = ConnState::CloseReceived;
                self.arm_drain(now);
                self.emit_closed(error);
            }
            ConnState::CloseSent => {
                self.state = ConnState::PtoTimedWait;
                self.arm_drain(now);
                self.emit_closed(self.close_error.unwrap_or(error));
            }
            _ => {}
        }
    }

    fn notify_writable_all(&mut self) {
        let ids: Vec<u16> = self
            .streams
            .iter()
            .filter(|(_, s)| s.sendable())
            .map(|(&id, _)| id)
            .collect();
        for id in ids {
            self.events
                .push_back(ConnectionEvent::StreamWritable(StreamId(id)));
        }
    }

    fn drop_stream_if_done(&mut self, id: StreamId) {
        if self
            .streams
            .get(&id.0)
            .is_some_and(|stream| stream.is_terminated())
        {
            trace!(stream = %id, "stream finished, releasing record");
            self.streams.remove(&id.0);
            self.scheduler.remove(id);
            // A finished peer stream frees a slot; tell the peer.
            let peer_parity = if self.is_initiator { 0 } else { 1 };
            if id.0 % 2 == peer_parity {
                self.max_streams_local += 1;
                self.pending_max_streams = true;
            }
        }
    }

    /// ICMP told us the path caps payloads below our current view.
    pub(crate) fn on_fragmentation_needed(&mut self, payload_cap: usize) {
        self.mtu.on_fragmentation_needed(payload_cap);
        self.install_mss(self.mtu.mss());
    }

    /// ICMP declared the path dead; terminal for this connection only.
    pub(crate) fn on_unreachable(&mut self) {
        self.enter_disconnected(TransportError::Timeout);
    }

    /// How long the endpoint must keep our CID draining after release.
    pub(crate) fn drain_period(&self) -> Duration {
        3 * self.rtt.pto(self.ack_tracker.max_ack_delay())
    }

    fn install_mss(&mut self, mss: usize) {
        debug!(cid = self.local_cid, mss, "installing probed MSS");
        self.cc.set_mss(mss);
        self.scheduler.set_quantum(mss);
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Earliest instant at which `handle_timeout` / `poll_transmit` wants
    /// to run again.
    pub fn next_wakeup(&self, now: Instant) -> Instant {
        if self.state == ConnState::WaitSendInitial || self.pending_close {
            return now;
        }

        let mut next = self.idle_deadline;
        if let Some(deadline) = self.drain_deadline {
            next = next.min(deadline);
        }
        if let Some(deadline) = self.handshake_deadline {
            next = next.min(deadline);
        }
        if self.state != ConnState::Connected {
            return next.max(now);
        }

        if let Some(at) = self.ack_tracker.next_ack_time() {
            next = next.min(at);
        }
        if let Some(at) = self
            .recovery
            .pto_deadline(&self.rtt, self.ack_tracker.max_ack_delay())
        {
            next = next.min(at);
        }
        if let Some(at) = self.mtu.next_timeout() {
            next = next.min(at);
        }
        if let Some(at) = self.keepalive_deadline {
            next = next.min(at);
        }
        if self.has_send_work() {
            next = next.min(self.next_send_time);
        }
        next.max(now)
    }

    /// Fires whatever deadlines have passed.
    pub fn handle_timeout(&mut self, now: Instant) {
        if self.state == ConnState::Disconnected {
            return;
        }

        if let Some(deadline) = self.drain_deadline
            && now >= deadline
        {
            let error = self.close_error.unwrap_or(TransportError::NoError);
            self.enter_disconnected(error);
            return;
        }

        if now >= self.idle_deadline {
            debug!(cid = self.local_cid, "idle timeout");
            self.enter_disconnected(TransportError::Timeout);
            return;
        }

        if let Some(deadline) = self.handshake_deadline
            && now >= deadline
        {
            if self.handshake_retries_left > 0 {
                self.handshake_retries_left -= 1;
                self.state = ConnState::WaitSendInitial;
                self.handshake_deadline = None;
                debug!(
                    retries_left = self.handshake_retries_left,
                    "handshake timeout, retrying Initial"
                );
            } else {
                debug!(cid = self.local_cid, "handshake failed");
                self.enter_disconnected(TransportError::Timeout);
                return;
            }
        }

        if self.state != ConnState::Connected {
            return;
        }

        self.mtu.on_timeout(now);

        if let Some(deadline) = self
            .recovery
            .pto_deadline(&self.rtt, self.ack_tracker.max_ack_delay())
            && now >= deadline
        {
            let count = self.recovery.on_pto_fired(now);
            if count > self.config.max_retransmissions {
                debug!(cid = self.local_cid, "PTO ladder exhausted");
                self.close_error = Some(TransportError::Timeout);
                self.state = ConnState::PtoTimedWait;
                self.arm_drain(now);
                return;
            }
            self.pending_ping = true;
        }

        if self.config.keepalive {
            match self.keepalive_deadline {
                Some(deadline) if now >= deadline => {
                    if self.keepalive_strikes >= self.config.max_keepalive_retries {
                        debug!(cid = self.local_cid, "keepalive gave up");
                        self.enter_disconnected(TransportError::Timeout);
                        return;
                    }
                    self.keepalive_strikes += 1;
                    self.pending_ping = true;
                    let timeout = self
                        .rtt
                        .srtt()
                        .max(Duration::from_millis(100))
                        * self.config.keepalive_timeout_rtt_mult;
                    self.keepalive_deadline = Some(now + timeout.min(self.config.keepalive_interval));
                }
                None => {
                    self.keepalive_deadline = Some(now + self.config.keepalive_interval);
                }
                _ => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Send path
    // ------------------------------------------------------------------

    fn has_send_work(&self) -> bool {
        self.pending_close
            || self.pending_crypto
            || self.pending_ping
            || self.pending_session_token
            || self.pending_max_data
            || self.pending_max_streams
            || self.recovery.has_lost()
            || self.streams.values().any(Stream::sendable)
    }

    /// Builds at most one datagram. The endpoint calls this in a loop.
    pub fn poll_transmit(&mut self, now: Instant) -> Option<Vec<u8>> {
        match self.state {
            ConnState::Disconnected => None,
            ConnState::WaitSendInitial => self.send_initial(now),
            ConnState::InitialSent | ConnState::Wait0Rtt => {
                // Retransmission is driven by the handshake timer resetting
                // the state to WaitSendInitial.
                None
            }
            ConnState::CloseSent | ConnState::CloseReceived | ConnState::PtoTimedWait => {
                if self.pending_close && self.keys.is_some() {
                    self.pending_close = false;
                    self.build_close_packet(now)
                } else {
                    None
                }
            }
            ConnState::Connected => self.poll_transmit_connected(now),
        }
    }

    fn send_initial(&mut self, now: Instant) -> Option<Vec<u8>> {
        let handshake = self.handshake.as_ref()?;
        let mut frames = vec![Frame::Crypto {
            random: handshake.random,
            data: handshake.public,
        }];
        if let Some(token) = self.offered_token {
            frames.push(Frame::SessionToken {
                effective_secs: 0,
                token,
            });
        }
        let datagram = self.build_packet(&frames, true, Some(MIN_MSS), false, now)?;
        // With a resumption token in the Initial the connection waits in
        // the 0-RTT state; the key agreement still completes normally.
        self.state = if self.offered_token.is_some() {
            ConnState::Wait0Rtt
        } else {
            ConnState::InitialSent
        };
        self.handshake_deadline = Some(now + self.config.handshake_timeout);
        debug!(cid = self.local_cid, "Initial sent");
        Some(datagram)
    }

    fn build_close_packet(&mut self, now: Instant) -> Option<Vec<u8>> {
        let error = self.close_error.unwrap_or(TransportError::NoError);
        let mut frames = Vec::new();
        if let Some(ack) = self.ack_tracker.build_ack(now) {
            frames.push(Frame::Ack(ack));
        }
        frames.push(Frame::ConnectionClose {
            error_code: error.code(),
            reason: self.close_reason.clone(),
        });
        let datagram = self.build_packet(&frames, false, None, false, now)?;
        self.ack_tracker.on_ack_sent();
        Some(datagram)
    }

    fn poll_transmit_connected(&mut self, now: Instant) -> Option<Vec<u8>> {
        // The responder's CRYPTO reply must stay unsealed: the peer derives
        // its keys from it.
        if self.pending_crypto {
            let handshake = self.handshake.as_ref()?;
            let mut frames = vec![Frame::Crypto {
                random: handshake.random,
                data: handshake.public,
            }];
            if let Some(ack) = self.ack_tracker.build_ack(now) {
                frames.push(Frame::Ack(ack));
            }
            let datagram = self.build_packet(&frames, true, Some(MIN_MSS), false, now)?;
            self.pending_crypto = false;
            self.ack_tracker.on_ack_sent();
            return Some(datagram);
        }

        if now < self.next_send_time {
            return None;
        }

        // Re-queue frames of lost packets before choosing anything new;
        // stream buffers serve retransmissions first.
        while let Some(lost) = self.recovery.pop_lost() {
            self.requeue_lost(lost, now);
        }

        let cwnd = self.cc.cwnd();
        let inflight = self.recovery.bytes_in_flight();
        let window_open = inflight < cwnd;

        // A standalone MTU probe has its own exact size.
        if window_open
            && !self.recovery.pool_exhausted()
            && let Some(size) = self.mtu.poll_probe()
        {
            if let Some(datagram) = self.build_probe_packet(size, now) {
                return Some(datagram);
            }
        }

        let mss = self.mtu.mss();
        let mut frames: Vec<Frame> = Vec::new();
        let mut metas: FrameMetaVec = FrameMetaVec::new();
        let mut ack_in_packet = false;

        // 1. ACK, either due or piggybacked below.
        if self.ack_tracker.should_send_ack(now)
            && let Some(ack) = self.ack_tracker.build_ack(now)
        {
            metas.push(FrameMeta {
                frame: SentFrame::Ack {
                    largest: ack.largest,
                },
                offset_in_packet: 0,
                length: 0,
            });
            frames.push(Frame::Ack(ack));
            ack_in_packet = true;
        }

        // 2. Path maintenance.
        if let Some(token) = self.path.take_pending_response() {
            metas.push(FrameMeta {
                frame: SentFrame::Other(FrameType::PathResponse),
                offset_in_packet: 0,
                length: 0,
            });
            frames.push(Frame::PathResponse { token });
        }
        if let Some(token) = self.path.take_pending_challenge() {
            metas.push(FrameMeta {
                frame: SentFrame::PathChallenge { token },
                offset_in_packet: 0,
                length: 0,
            });
            frames.push(Frame::PathChallenge { token });
        }

        // 3. Control frames.
        if self.pending_session_token {
            let token = crate::crypto::mint_session_token(&mut self.rng);
            frames.push(Frame::SessionToken {
                effective_secs: self.config.session_token_secs,
                token,
            });
            metas.push(FrameMeta {
                frame: SentFrame::SessionToken,
                offset_in_packet: 0,
                length: 0,
            });
            self.pending_session_token = false;
        }
        if self.pending_max_data {
            frames.push(Frame::MaxData {
                maximum_data: self.max_data_local,
            });
            metas.push(FrameMeta {
                frame: SentFrame::MaxData,
                offset_in_packet: 0,
                length: 0,
            });
            self.pending_max_data = false;
        }
        if self.pending_max_streams {
            frames.push(Frame::MaxStreams {
                unidirectional: false,
                maximum: self.max_streams_local,
            });
            metas.push(FrameMeta {
                frame: SentFrame::Other(FrameType::MaxStreams),
                offset_in_packet: 0,
                length: 0,
            });
            self.pending_max_streams = false;
        }
        let stream_controls: Vec<Frame> = {
            let mut out = Vec::new();
            for stream in self.streams.values_mut() {
                if let Some(maximum) = stream.take_max_stream_data() {
                    out.push(Frame::MaxStreamData {
                        stream_id: stream.id,
                        maximum_stream_data: maximum,
                    });
                }
                if let Some(limit) = stream.take_blocked() {
                    out.push(Frame::StreamBlocked {
                        stream_id: stream.id,
                        maximum_stream_data: limit,
                    });
                }
                if let Some((error_code, final_offset)) = stream.take_pending_reset() {
                    out.push(Frame::ResetStream {
                        stream_id: stream.id,
                        error_code,
                        final_offset,
                    });
                }
            }
            out
        };
        for frame in stream_controls {
            let meta = match &frame {
                Frame::MaxStreamData { stream_id, .. } => SentFrame::MaxStreamData {
                    stream_id: *stream_id,
                },
                Frame::ResetStream { stream_id, .. } => SentFrame::ResetStream {
                    stream_id: *stream_id,
                },
                _ => SentFrame::Other(frame.frame_type()),
            };
            metas.push(FrameMeta {
                frame: meta,
                offset_in_packet: 0,
                length: 0,
            });
            frames.push(frame);
        }
        if let Some(limit) = self.pending_blocked.take() {
            frames.push(Frame::Blocked {
                maximum_data: limit,
            });
            metas.push(FrameMeta {
                frame: SentFrame::Other(FrameType::Blocked),
                offset_in_packet: 0,
                length: 0,
            });
        }

        // 4/5. Stream data under cwnd, retransmissions first per stream.
        let header_overhead = self.header_len_estimate() + AEAD_TAG_LEN;
        let mut payload_budget = mss.saturating_sub(header_overhead);
        let used: usize = frames.iter().map(Self::frame_size_estimate).sum();
        payload_budget = payload_budget.saturating_sub(used);

        if window_open && !self.recovery.pool_exhausted() {
            self.fill_stream_frames(&mut frames, &mut metas, payload_budget, now);
        } else if !window_open {
            self.app_limited = false;
        }

        // 6. PING as PTO probe or keepalive.
        if self.pending_ping {
            frames.push(Frame::Ping);
            metas.push(FrameMeta {
                frame: SentFrame::Ping,
                offset_in_packet: 0,
                length: 0,
            });
            self.pending_ping = false;
            self.stats.ping_count += 1;
        }

        if frames.is_empty() {
            // Out of data with window to spare: the flow is app-limited.
            if window_open {
                self.app_limited = true;
            }
            return None;
        }

        let datagram = self.build_packet_with_metas(&frames, metas, false, None, false, now)?;
        if ack_in_packet {
            self.ack_tracker.on_ack_sent();
        }
        Some(datagram)
    }

    fn requeue_lost(&mut self, lost: PacketOut, now: Instant) {
        for meta in &lost.frames {
            match &meta.frame {
                SentFrame::Stream {
                    stream_id,
                    offset,
                    len,
                    fin,
                } => {
                    if let Some(stream) = self.streams.get_mut(&stream_id.0) {
                        stream.on_chunk_lost(*offset, *len as usize, *fin);
                    }
                }
                SentFrame::ResetStream { stream_id } => {
                    if let Some(stream) = self.streams.get_mut(&stream_id.0) {
                        stream.retransmit_reset();
                    }
                }
                SentFrame::MaxData => self.pending_max_data = true,
                SentFrame::MaxStreamData { stream_id } => {
                    if let Some(stream) = self.streams.get_mut(&stream_id.0) {
                        stream.on_max_stream_data_lost();
                    }
                }
                SentFrame::Crypto => self.pending_crypto = true,
                SentFrame::SessionToken => self.pending_session_token = true,
                SentFrame::PathChallenge { token } => self.path.retransmit_challenge(*token),
                SentFrame::Ack { .. } | SentFrame::Ping | SentFrame::Other(_) => {}
            }
        }
        if lost.flags & po_flags::MTU_PROBE != 0 {
            self.mtu.on_probe_lost(lost.pn, now);
        }
    }

    fn fill_stream_frames(
        &mut self,
        frames: &mut Vec<Frame>,
        metas: &mut FrameMetaVec,
        mut budget: usize,
        _now: Instant,
    ) {
        loop {
            if budget <= STREAM_FRAME_OVERHEAD {
                return;
            }
            let chunk_budget = budget - STREAM_FRAME_OVERHEAD;
            let conn_allowance = self.max_data_peer.saturating_sub(self.conn_bytes_sent);

            let streams = &self.streams;
            let picked = self.scheduler.next_stream(|id| {
                streams
                    .get(&id.0)
                    .and_then(|s| s.next_chunk_len(chunk_budget, conn_allowance))
            });
            let Some(id) = picked else {
                // Note connection-level starvation for a BLOCKED frame,
                // once per limit.
                if conn_allowance == 0
                    && self.streams.values().any(Stream::sendable)
                    && self.blocked_reported_at != Some(self.max_data_peer)
                {
                    self.pending_blocked = Some(self.max_data_peer);
                    self.blocked_reported_at = Some(self.max_data_peer);
                }
                return;
            };

            let Some(chunk) = self
                .streams
                .get_mut(&id.0)
                .and_then(|s| s.next_chunk(chunk_budget, conn_allowance))
            else {
                continue;
            };

            let StreamChunk {
                offset,
                data,
                fin,
                is_retransmit,
            } = chunk;
            let len = data.len();
            budget -= STREAM_FRAME_OVERHEAD + len;
            if is_retransmit {
                self.stats.rtx_bytes += len as u64;
            } else {
                self.conn_bytes_sent += len as u64;
            }
            metas.push(FrameMeta {
                frame: SentFrame::Stream {
                    stream_id: id,
                    offset,
                    len: len as u16,
                    fin,
                },
                offset_in_packet: 0,
                length: len as u16,
            });
            frames.push(Frame::Stream(StreamFrame {
                stream_id: id,
                fin,
                offset,
                data,
            }));
        }
    }

    fn build_probe_packet(&mut self, probe_size: usize, now: Instant) -> Option<Vec<u8>> {
        let frames = vec![Frame::Ping];
        let datagram = self.build_packet(&frames, false, Some(probe_size), true, now)?;
        debug_assert_eq!(datagram.len(), probe_size);
        self.mtu.on_probe_sent(self.next_pn - 1, probe_size, now);
        Some(datagram)
    }

    fn header_len_estimate(&self) -> usize {
        let pn_len = packet_number_len(self.next_pn, self.recovery.largest_acked());
        crate::packet::HEADER_FIXED_LEN + pn_len as usize + crate::packet::HEADER_TAIL_LEN
    }

    fn frame_size_estimate(frame: &Frame) -> usize {
        let mut scratch = Vec::new();
        frame.encode(&mut scratch)
    }

    fn build_packet(
        &mut self,
        frames: &[Frame],
        hello: bool,
        pad_to: Option<usize>,
        mtu_probe: bool,
        now: Instant,
    ) -> Option<Vec<u8>> {
        let mut metas = FrameMetaVec::new();
        for frame in frames {
            let meta = match frame {
                Frame::Crypto { .. } => SentFrame::Crypto,
                Frame::Ack(ack) => SentFrame::Ack {
                    largest: ack.largest,
                },
                Frame::Ping => SentFrame::Ping,
                Frame::SessionToken { .. } => SentFrame::SessionToken,
                other => SentFrame::Other(other.frame_type()),
            };
            metas.push(FrameMeta {
                frame: meta,
                offset_in_packet: 0,
                length: 0,
            });
        }
        self.build_packet_with_metas(frames, metas, hello, pad_to, mtu_probe, now)
    }

    /// Serializes, seals and registers one packet; returns the datagram.
    fn build_packet_with_metas(
        &mut self,
        frames: &[Frame],
        mut metas: FrameMetaVec,
        hello: bool,
        pad_to: Option<usize>,
        mtu_probe: bool,
        now: Instant,
    ) -> Option<Vec<u8>> {
        debug_assert_eq!(frames.len(), metas.len());
        let pn = self.next_pn;
        let pn_len = packet_number_len(pn, self.recovery.largest_acked());
        let header_len =
            crate::packet::HEADER_FIXED_LEN + pn_len as usize + crate::packet::HEADER_TAIL_LEN;
        let seal_overhead = if hello { 0 } else { AEAD_TAG_LEN };

        let mut payload = Vec::new();
        let mut frame_types = 0u32;
        let mut ack_eliciting = false;
        for (frame, meta) in frames.iter().zip(metas.iter_mut()) {
            meta.offset_in_packet = payload.len() as u16;
            let written = frame.encode(&mut payload);
            if meta.length == 0 {
                meta.length = written as u16;
            }
            frame_types |= frame.frame_type().bit();
            ack_eliciting |= frame.is_ack_eliciting();
        }

        // Pad the datagram to the requested size (handshake and MTU
        // probes).
        if let Some(target) = pad_to {
            let wire = header_len + payload.len() + seal_overhead;
            if wire + PADDING_FRAME_MIN <= target {
                let padding = (target - wire - PADDING_FRAME_MIN) as u16;
                let frame = Frame::Padding { length: padding };
                let offset = payload.len() as u16;
                let written = frame.encode(&mut payload);
                metas.push(FrameMeta {
                    frame: SentFrame::Other(FrameType::Padding),
                    offset_in_packet: offset,
                    length: written as u16,
                });
                frame_types |= FrameType::Padding.bit();
            }
        }

        let sealed_len = payload.len() + seal_overhead;
        if sealed_len > u16::MAX as usize {
            warn!(len = sealed_len, "packet payload too large");
            return None;
        }

        // Anti-amplification on unvalidated paths.
        let wire_size = header_len + sealed_len;
        if !self.path.may_send(wire_size) {
            trace!(cid = self.local_cid, "amplification limit reached");
            return None;
        }

        let header = PacketHeader {
            version: PROTOCOL_VERSION,
            dcid: self.peer_cid,
            scid: self.local_cid,
            pn_len,
            pn_truncated: truncate_packet_number(pn, pn_len),
            flags: if hello { FLAG_HELLO } else { 0 },
            payload_len: sealed_len as u16,
        };

        let mut datagram = Vec::with_capacity(wire_size);
        header.encode(&mut datagram);
        debug_assert_eq!(datagram.len(), header_len);

        if hello {
            datagram.extend_from_slice(&payload);
        } else {
            let keys = self.keys.as_ref()?;
            let sealed = keys.send.seal(pn, &datagram[..header_len], &payload);
            debug_assert_eq!(sealed.len(), sealed_len);
            datagram.extend_from_slice(&sealed);
        }

        // Register with the sampler and the unacked list.
        self.next_pn += 1;
        let size = datagram.len() as u32;
        let inflight = self.recovery.bytes_in_flight();
        let app_limited = self.app_limited;
        if inflight + size as u64 >= self.cc.cwnd() {
            self.app_limited = false;
        }

        if ack_eliciting {
            let bw_state = self
                .cc
                .on_packet_sent(pn, size, inflight, app_limited, now);
            let mut flags = if hello {
                po_flags::HELLO | po_flags::NO_ENCRYPT
            } else {
                po_flags::ENCRYPTED
            };
            if mtu_probe {
                flags |= po_flags::MTU_PROBE;
            }
            let record = PacketOut {
                pn,
                sent_time: now,
                size: size as u16,
                frame_types,
                flags,
                frames: metas,
                ack_eliciting,
                bw_state: Some(bw_state),
                next_in_loss_chain: None,
            };
            if self.recovery.on_packet_sent(record).is_err() {
                // Pool exhaustion: the packet still goes out; losing its
                // record only costs retransmission tracking.
                warn!(pn, "sent packet without a pool record");
            }
            // Only ack-eliciting packets count: once drained, tx equals
            // acked on a clean link.
            self.stats.tx_bytes += datagram.len() as u64;
        }

        self.path.on_bytes_sent(datagram.len());
        self.advance_pacer(datagram.len(), now);
        Some(datagram)
    }

    fn advance_pacer(&mut self, bytes: usize, now: Instant) {
        let rate = self.cc.pacing_rate().max(1);
        let gap = Duration::from_secs_f64(bytes as f64 / rate as f64);
        // Allow a bounded burst: the pacer never accumulates more than
        // `pacing_burst_packets` worth of credit.
        let burst = Duration::from_secs_f64(
            (self.config.pacing_burst_packets * self.mtu.mss()) as f64 / rate as f64,
        );
        let floor = now.checked_sub(burst).unwrap_or(now);
        self.next_send_time = self.next_send_time.max(floor) + gap;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("local_cid", &self.local_cid)
            .field("peer_cid", &self.peer_cid)
            .field("state", &self.state)
            .field("streams", &self.streams.len())
            .finish_non_exhaustive()
    }
}
