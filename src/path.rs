//! Path state and address validation: challenge/response on migration and
//! the anti-amplification cap until the new path proves itself.

use std::net::SocketAddr;

use rand::RngCore;
use tracing::{debug, warn};

/// Unvalidated paths may carry at most this multiple of the bytes received
/// from them.
const AMPLIFICATION_FACTOR: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathState {
    Validated,
    /// Challenge outstanding with the token we expect echoed back.
    Probing { token: [u8; 8] },
}

#[derive(Debug)]
pub struct PathValidator {
    addr: SocketAddr,
    state: PathState,
    /// Bytes received from the peer on the current path.
    bytes_received: u64,
    /// Bytes sent to the current path while unvalidated.
    bytes_sent: u64,
    /// Challenge queued but not yet put in a packet.
    pending_challenge: Option<[u8; 8]>,
    /// Peer challenge awaiting a PATH_RESPONSE echo.
    pending_response: Option<[u8; 8]>,
}

impl PathValidator {
    /// A path proven by the handshake itself.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            state: PathState::Validated,
            bytes_received: 0,
            bytes_sent: 0,
            pending_challenge: None,
            pending_response: None,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_validated(&self) -> bool {
        self.state == PathState::Validated
    }

    /// Notes the source address of an accepted packet. A change moves the
    /// connection onto an unvalidated path and schedules a challenge.
    pub fn on_peer_address(&mut self, addr: SocketAddr, rng: &mut dyn RngCore) -> bool {
        if addr == self.addr {
            return false;
        }
        debug!(old = %self.addr, new = %addr, "peer address changed, validating path");
        self.addr = addr;
        let mut token = [0u8; 8];
        rng.fill_bytes(&mut token);
        self.state = PathState::Probing { token };
        self.bytes_received = 0;
        self.bytes_sent = 0;
        self.pending_challenge = Some(token);
        true
    }

    /// Challenge token to send, if one is queued.
    pub fn take_pending_challenge(&mut self) -> Option<[u8; 8]> {
        self.pending_challenge.take()
    }

    /// Re-arms the challenge after the carrying packet was lost.
    pub fn retransmit_challenge(&mut self, token: [u8; 8]) {
        if let PathState::Probing { token: expected } = self.state
            && expected == token
        {
            self.pending_challenge = Some(token);
        }
    }

    pub fn on_path_challenge(&mut self, token: [u8; 8]) {
        // Most recent challenge wins.
        self.pending_response = Some(token);
    }

    /// Echo for the peer's outstanding challenge.
    pub fn take_pending_response(&mut self) -> Option<[u8; 8]> {
        self.pending_response.take()
    }

    /// Returns true when the response matches and the path became valid.
    pub fn on_path_response(&mut self, token: [u8; 8]) -> bool {
        match self.state {
            PathState::Probing { token: expected } if expected == token => {
                debug!(addr = %self.addr, "path validated");
                self.state = PathState::Validated;
                self.pending_challenge = None;
                true
            }
            PathState::Probing { .. } => {
                warn!(addr = %self.addr, "PATH_RESPONSE with stale token ignored");
                false
            }
            PathState::Validated => false,
        }
    }

    pub fn on_bytes_received(&mut self, bytes: usize) {
        self.bytes_received = self.bytes_received.saturating_add(bytes as u64);
    }

    pub fn on_bytes_sent(&mut self, bytes: usize) {
        if !self.is_validated() {
            self.bytes_sent = self.bytes_sent.saturating_add(bytes as u64);
        }
    }

    /// Anti-amplification: an unvalidated path may carry `bytes` more only
    /// while staying under three times what the peer sent us.
    pub fn may_send(&self, bytes: usize) -> bool {
        self.is_validated()
            || self.bytes_sent + bytes as u64 <= AMPLIFICATION_FACTOR * self.bytes_received
    }
}
