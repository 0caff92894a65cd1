//! Datagram-packetization-layer path-MTU discovery: a bounded binary search
//! driven by padded probe packets with the don't-fragment bit set.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::{Config, LOCALHOST_MSS, MIN_MSS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeState {
    /// A probe size is chosen but not yet on the wire.
    Ready(usize),
    InFlight {
        pn: u64,
        size: usize,
        deadline: Instant,
    },
    /// Search finished; `best` is installed as the connection MSS.
    Complete,
}

/// DPLPMTUD prober. The working MSS is always `best`, a size the path has
/// proven (starting at the IPv6 minimum); probes explore upward toward
/// `upper`.
#[derive(Debug)]
pub struct MtuProber {
    lower: usize,
    upper: usize,
    best: usize,
    granularity: usize,
    timeout: Duration,
    max_retries: u32,
    retries_left: u32,
    state: ProbeState,
}

impl MtuProber {
    pub fn new(config: &Config) -> Self {
        Self {
            lower: MIN_MSS,
            upper: LOCALHOST_MSS,
            best: MIN_MSS,
            granularity: config.mtu_probe_granularity.max(1),
            timeout: config.mtu_probe_timeout,
            max_retries: config.mtu_probe_retries,
            retries_left: config.mtu_probe_retries,
            // The first attempt goes straight for the configured MSS; the
            // midpoint walk starts from its outcome.
            state: ProbeState::Ready(config.initial_mss.clamp(MIN_MSS, LOCALHOST_MSS)),
        }
    }

    /// The size the path is currently known to carry.
    pub fn mss(&self) -> usize {
        self.best
    }

    pub fn is_complete(&self) -> bool {
        self.state == ProbeState::Complete
    }

    /// Size of the probe to put on the wire, if one is due.
    pub fn poll_probe(&self) -> Option<usize> {
        match self.state {
            ProbeState::Ready(size) => Some(size),
            _ => None,
        }
    }

    pub fn on_probe_sent(&mut self, pn: u64, size: usize, now: Instant) {
        debug_assert!(matches!(self.state, ProbeState::Ready(_)));
        self.state = ProbeState::InFlight {
            pn,
            size,
            deadline: now + self.timeout,
        };
    }

    /// Probe acknowledged: the candidate size works. Returns the new MSS
    /// when it changed.
    pub fn on_probe_acked(&mut self, pn: u64) -> Option<usize> {
        let ProbeState::InFlight { pn: probe_pn, size, .. } = self.state else {
            return None;
        };
        if pn != probe_pn {
            return None;
        }
        let changed = size > self.best;
        self.best = self.best.max(size);
        self.lower = self.lower.max(size);
        self.retries_left = self.max_retries;
        debug!(mss = self.best, "MTU probe succeeded");
        self.pick_next();
        changed.then_some(self.best)
    }

    pub fn on_probe_lost(&mut self, pn: u64, now: Instant) {
        if let ProbeState::InFlight { pn: probe_pn, .. } = self.state
            && pn == probe_pn
        {
            self.on_probe_failed(now);
        }
    }

    /// Fires the per-attempt timer.
    pub fn on_timeout(&mut self, now: Instant) {
        if let ProbeState::InFlight { deadline, .. } = self.state
            && now >= deadline
        {
            self.on_probe_failed(now);
        }
    }

    fn on_probe_failed(&mut self, _now: Instant) {
        let ProbeState::InFlight { size, .. } = self.state else {
            return;
        };
        if self.retries_left > 0 {
            // Same candidate again; loss may have been ordinary.
            self.retries_left -= 1;
            self.state = ProbeState::Ready(size);
            return;
        }
        self.upper = size.saturating_sub(1).max(self.lower);
        self.retries_left = self.max_retries;
        debug!(upper = self.upper, "MTU probe failed, lowering upper bound");
        self.pick_next();
    }

    fn pick_next(&mut self) {
        if self.upper.saturating_sub(self.lower) < self.granularity {
            debug!(mss = self.best, "MTU search complete");
            self.state = ProbeState::Complete;
            return;
        }
        let mid = (self.lower + self.upper + 1) / 2;
        self.state = ProbeState::Ready(mid.max(self.lower + 1));
    }

    /// ICMP fragmentation-needed reported a payload ceiling: clamp the
    /// search above it and re-probe immediately.
    pub fn on_fragmentation_needed(&mut self, payload_cap: usize) {
        let cap = payload_cap.max(MIN_MSS);
        if cap >= self.upper {
            return;
        }
        self.upper = cap;
        if self.lower > cap {
            // The path shrank under us; the old floor is no longer proven.
            self.lower = MIN_MSS;
        }
        if self.best > cap {
            self.best = cap;
        }
        self.retries_left = self.max_retries;
        debug!(upper = self.upper, "fragmentation needed, re-probing");
        self.state = ProbeState::Ready(self.upper);
    }

    /// Deadline of the probe currently in flight.
    pub fn next_timeout(&self) -> Option<Instant> {
        match self.state {
            ProbeState::InFlight { deadline, .. } => Some(deadline),
            _ => None,
        }
    }
}
