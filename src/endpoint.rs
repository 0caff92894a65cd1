//! The endpoint multiplexes many connections over one UDP socket: it
//! allocates connection IDs, routes incoming datagrams by destination CID,
//! applies the accept policy, and keeps closed CIDs draining so late
//! packets die quietly.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::{debug, trace, warn};

use crate::config::{Config, PROTOCOL_VERSION, SocketOptions};
use crate::connection::Connection;
use crate::error::TransportError;
use crate::frame::Frame;
use crate::packet::{FLAG_HELLO, PacketHeader, expand_packet_number};
use crate::time::TimeProvider;
use crate::{ConnectionEvent, ConnectionId};

/// A datagram the host must put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    pub to: SocketAddr,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointEvent {
    /// The accept policy admitted a new peer.
    NewConnection(ConnectionId),
    Connection(ConnectionId, ConnectionEvent),
}

/// Kernel error-queue messages the host feeds back in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketError {
    /// ICMP fragmentation-needed: the path caps UDP payloads at
    /// `payload_mtu` bytes.
    FragmentationNeeded {
        peer: SocketAddr,
        payload_mtu: usize,
    },
    /// ICMP net/host/protocol/port unreachable.
    Unreachable { peer: SocketAddr },
}

/// Bitmap allocator over the 16-bit connection-ID space. Slot 0 is
/// reserved as the "unknown peer" marker in Initial packets.
#[derive(Debug)]
struct CidAllocator {
    words: Vec<u64>,
}

impl CidAllocator {
    fn new() -> Self {
        let mut alloc = Self {
            words: vec![0; (u16::MAX as usize + 1) / 64],
        };
        alloc.words[0] = 1; // reserve CID 0
        alloc
    }

    /// Lowest free slot.
    fn alloc(&mut self) -> Option<u32> {
        for (i, word) in self.words.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = word.trailing_ones() as usize;
                *word |= 1 << bit;
                return Some((i * 64 + bit) as u32);
            }
        }
        None
    }

    fn free(&mut self, cid: u32) {
        let idx = cid as usize;
        if idx / 64 < self.words.len() {
            debug_assert!(self.words[idx / 64] & (1 << (idx % 64)) != 0);
            self.words[idx / 64] &= !(1 << (idx % 64));
        }
    }
}

/// Minimum spacing of stateless CONNECTION_CLOSE replies to unknown CIDs.
const STATELESS_CLOSE_INTERVAL: Duration = Duration::from_secs(1);

pub struct Endpoint {
    config: Config,
    connections: BTreeMap<u32, Connection>,
    cids: CidAllocator,
    accepting: bool,
    /// Released CIDs still in their 3-PTO drain window.
    draining: HashMap<u32, Instant>,
    events: VecDeque<EndpointEvent>,
    transmits: VecDeque<Transmit>,
    last_stateless_close: Option<Instant>,
    time_provider: Arc<dyn TimeProvider>,
    rng: StdRng,
}

impl Endpoint {
    pub fn new(
        config: Config,
        time_provider: Arc<dyn TimeProvider>,
        rng: &mut dyn RngCore,
    ) -> Self {
        Self {
            config,
            connections: BTreeMap::new(),
            cids: CidAllocator::new(),
            accepting: false,
            draining: HashMap::new(),
            events: VecDeque::new(),
            transmits: VecDeque::new(),
            last_stateless_close: None,
            time_provider,
            rng: StdRng::seed_from_u64(rng.next_u64()),
        }
    }

    /// Socket configuration the host must apply to the UDP socket this
    /// endpoint is bound to.
    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions::default()
    }

    /// Starts admitting peer-initiated connections.
    pub fn listen(&mut self) {
        self.accepting = true;
    }

    /// Opens a connection toward `remote`. The handshake proceeds as the
    /// host pumps `poll_transmit` / `handle_datagram`.
    pub fn connect(
        &mut self,
        remote: SocketAddr,
        token: Option<[u8; 32]>,
    ) -> Result<ConnectionId, TransportError> {
        let now = self.time_provider.now_instant();
        let cid = self.cids.alloc().ok_or(TransportError::Internal)?;
        let rng = StdRng::seed_from_u64(self.rng.next_u64());
        let conn =
            Connection::new_initiator(cid, remote, self.config.clone(), token, rng, now);
        debug!(cid, %remote, "connecting");
        self.connections.insert(cid, conn);
        Ok(ConnectionId(cid))
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id.0)
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id.0)
    }

    /// Graceful close with a drain phase; idempotent.
    pub fn close(&mut self, id: ConnectionId, error: TransportError, reason: &str) {
        let now = self.time_provider.now_instant();
        if let Some(conn) = self.connections.get_mut(&id.0) {
            conn.close(error, reason, now);
        }
        self.sweep(now);
    }

    /// Immediate teardown.
    pub fn shutdown(&mut self, id: ConnectionId) {
        let now = self.time_provider.now_instant();
        if let Some(conn) = self.connections.get_mut(&id.0) {
            conn.shutdown(now);
        }
        self.sweep(now);
    }

    /// Feeds one received UDP datagram into the state machine.
    pub fn handle_datagram(&mut self, from: SocketAddr, data: &[u8]) {
        let now = self.time_provider.now_instant();
        let Ok((header, header_len)) = PacketHeader::decode(data) else {
            trace!(%from, len = data.len(), "undecodable datagram dropped");
            return;
        };

        if let Some(&deadline) = self.draining.get(&header.dcid) {
            if now < deadline {
                trace!(cid = header.dcid, "datagram for draining CID discarded");
            } else {
                self.draining.remove(&header.dcid);
                self.cids.free(header.dcid);
                debug!(cid = header.dcid, "unknown CID");
            }
            return;
        }

        if let Some(conn) = self.connections.get_mut(&header.dcid) {
            conn.handle_packet(&header, data, header_len, from, now);
        } else if header.flags & FLAG_HELLO != 0 && header.dcid == 0 {
            self.accept(&header, data, header_len, from, now);
        } else {
            debug!(cid = header.dcid, %from, "datagram for unknown CID");
            self.stateless_close(&header, from, now);
            return;
        }
        self.sweep(now);
    }

    /// Accept policy: an Initial packet carrying CRYPTO creates a
    /// responder connection.
    fn accept(
        &mut self,
        header: &PacketHeader,
        data: &[u8],
        header_len: usize,
        from: SocketAddr,
        now: Instant,
    ) {
        if !self.accepting {
            trace!(%from, "Initial ignored, not listening");
            return;
        }
        if header.version != PROTOCOL_VERSION {
            warn!(%from, version = header.version, "Initial with unknown version");
            return;
        }
        let payload_end = header_len + header.payload_len as usize;
        if data.len() < payload_end {
            return;
        }
        let payload = &data[header_len..payload_end];

        let mut crypto = None;
        let mut cursor = 0usize;
        while cursor < payload.len() {
            match Frame::decode(&payload[cursor..]) {
                Ok((Frame::Crypto { random, data }, used)) => {
                    crypto = Some((random, data));
                    cursor += used;
                }
                Ok((_, used)) => cursor += used,
                Err(_) => {
                    trace!(%from, "malformed Initial dropped");
                    return;
                }
            }
        }
        let Some((random, public)) = crypto else {
            trace!(%from, "Initial without CRYPTO dropped");
            return;
        };

        let Some(cid) = self.cids.alloc() else {
            warn!("connection ID space exhausted");
            return;
        };
        let pn = expand_packet_number(header.pn_truncated, header.pn_len, None);
        let rng = StdRng::seed_from_u64(self.rng.next_u64());
        let conn = Connection::new_responder(
            cid,
            header.scid,
            from,
            self.config.clone(),
            random,
            public,
            pn,
            data.len(),
            rng,
            now,
        );
        debug!(cid, %from, "accepted connection");
        self.connections.insert(cid, conn);
        self.events
            .push_back(EndpointEvent::NewConnection(ConnectionId(cid)));
    }

    /// Answers an unknown CID with an unencrypted CONNECTION_CLOSE built
    /// from the received header's IDs, rate-limited.
    fn stateless_close(&mut self, header: &PacketHeader, from: SocketAddr, now: Instant) {
        if header.scid == 0 {
            return;
        }
        if self
            .last_stateless_close
            .is_some_and(|last| now.saturating_duration_since(last) < STATELESS_CLOSE_INTERVAL)
        {
            return;
        }
        self.last_stateless_close = Some(now);

        let close = Frame::ConnectionClose {
            error_code: TransportError::StreamNotFound.code(),
            reason: String::new(),
        };
        let mut payload = Vec::new();
        close.encode(&mut payload);
        let reply = PacketHeader {
            version: PROTOCOL_VERSION,
            dcid: header.scid,
            scid: header.dcid,
            pn_len: 1,
            pn_truncated: 0,
            flags: FLAG_HELLO,
            payload_len: payload.len() as u16,
        };
        let mut datagram = Vec::new();
        reply.encode(&mut datagram);
        datagram.extend_from_slice(&payload);
        self.transmits.push_back(Transmit {
            to: from,
            payload: datagram,
        });
    }

    /// Routes a kernel error-queue message.
    pub fn handle_socket_error(&mut self, error: SocketError) {
        let now = self.time_provider.now_instant();
        match error {
            SocketError::FragmentationNeeded { peer, payload_mtu } => {
                for conn in self.connections.values_mut() {
                    if conn.peer_addr() == peer {
                        conn.on_fragmentation_needed(payload_mtu);
                    }
                }
            }
            SocketError::Unreachable { peer } => {
                for conn in self.connections.values_mut() {
                    if conn.peer_addr() == peer {
                        debug!(cid = conn.local_cid(), %peer, "path unreachable");
                        conn.on_unreachable();
                    }
                }
            }
        }
        self.sweep(now);
    }

    /// Next datagram to send, if any connection has one.
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        if let Some(t) = self.transmits.pop_front() {
            return Some(t);
        }
        let now = self.time_provider.now_instant();
        let mut out = None;
        for conn in self.connections.values_mut() {
            if let Some(payload) = conn.poll_transmit(now) {
                out = Some(Transmit {
                    to: conn.peer_addr(),
                    payload,
                });
                break;
            }
        }
        self.sweep(now);
        out
    }

    /// Fires every deadline that has passed.
    pub fn handle_timeout(&mut self) {
        let now = self.time_provider.now_instant();
        for conn in self.connections.values_mut() {
            conn.handle_timeout(now);
        }
        let expired: Vec<u32> = self
            .draining
            .iter()
            .filter(|&(_, &deadline)| now >= deadline)
            .map(|(&cid, _)| cid)
            .collect();
        for cid in expired {
            trace!(cid, "drain window over, releasing CID");
            self.draining.remove(&cid);
            self.cids.free(cid);
        }
        self.sweep(now);
    }

    /// Earliest instant the host must call back.
    pub fn next_wakeup(&self) -> Option<Instant> {
        let now = self.time_provider.now_instant();
        let mut next: Option<Instant> = None;
        for conn in self.connections.values() {
            let at = conn.next_wakeup(now);
            next = Some(next.map_or(at, |n: Instant| n.min(at)));
        }
        for &deadline in self.draining.values() {
            next = Some(next.map_or(deadline, |n| n.min(deadline)));
        }
        if !self.transmits.is_empty() {
            return Some(now);
        }
        next
    }

    pub fn poll_event(&mut self) -> Option<EndpointEvent> {
        if let Some(event) = self.events.pop_front() {
            return Some(event);
        }
        let now = self.time_provider.now_instant();
        self.sweep(now);
        self.events.pop_front()
    }

    /// Harvests connection events and retires fully closed connections
    /// into the drain map.
    fn sweep(&mut self, now: Instant) {
        let mut dead = Vec::new();
        for (&cid, conn) in self.connections.iter_mut() {
            while let Some(event) = conn.poll_event() {
                self.events
                    .push_back(EndpointEvent::Connection(ConnectionId(cid), event));
            }
            if conn.is_closed() {
                dead.push((cid, conn.drain_period()));
            }
        }
        for (cid, drain) in dead {
            debug!(cid, "connection retired, CID draining");
            self.connections.remove(&cid);
            self.draining.insert(cid, now + drain);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("connections", &self.connections.len())
            .field("accepting", &self.accepting)
            .field("draining", &self.draining.len())
            .finish_non_exhaustive()
    }
}
