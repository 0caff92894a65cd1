//! In-memory two-endpoint link with a manual clock, a fixed one-way
//! latency and scriptable loss.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use riptide::endpoint::{Endpoint, EndpointEvent, Transmit};
use riptide::time::{ManualTimeProvider, TimeProvider};
use riptide::{Config, ConnectionEvent, ConnectionId, StreamId};

pub fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

struct InFlight {
    deliver_at: Instant,
    /// Destination is B; anything else goes to A's current address.
    to_b: bool,
    payload: Vec<u8>,
}

pub struct Pair {
    pub a: Endpoint,
    pub b: Endpoint,
    pub addr_a: SocketAddr,
    pub addr_b: SocketAddr,
    pub time: Arc<ManualTimeProvider>,
    /// One-way propagation delay of the link.
    pub latency: Duration,
    /// Returns true when the datagram should be dropped.
    pub drop_fn: Option<Box<dyn FnMut(&Transmit) -> bool>>,
    pub dropped: usize,
    pub delivered: usize,
    in_flight: VecDeque<InFlight>,
}

impl Pair {
    pub fn new(config: Config) -> Self {
        Self::with_configs(config.clone(), config)
    }

    pub fn with_configs(config_a: Config, config_b: Config) -> Self {
        let time = Arc::new(ManualTimeProvider::new(Instant::now(), 1_700_000_000_000));
        let mut rng = StdRng::seed_from_u64(7);
        let a = Endpoint::new(config_a, time.clone(), &mut rng);
        let b = Endpoint::new(config_b, time.clone(), &mut rng);
        Self {
            a,
            b,
            addr_a: addr(4000),
            addr_b: addr(4001),
            time,
            latency: Duration::from_millis(2),
            drop_fn: None,
            dropped: 0,
            delivered: 0,
            in_flight: VecDeque::new(),
        }
    }

    /// Connects A to B and pumps until both sides are up.
    pub fn connect(&mut self) -> (ConnectionId, ConnectionId) {
        self.b.listen();
        let a_id = self.a.connect(self.addr_b, None).unwrap();
        let b_id = self
            .run_until(Duration::from_secs(5), |pair| {
                pair.b_events().iter().find_map(|ev| match ev {
                    EndpointEvent::NewConnection(id) => Some(*id),
                    _ => None,
                })
            })
            .expect("handshake completes");
        // Let the CRYPTO reply land so A reaches Connected too.
        self.run_for(Duration::from_millis(200));
        (a_id, b_id)
    }

    /// One exchange round: timers, due deliveries, then queue every
    /// pending datagram with the link latency.
    pub fn pump(&mut self) {
        self.a.handle_timeout();
        self.b.handle_timeout();

        let now = self.time.now_instant();
        while let Some(entry) = self.in_flight.front() {
            if entry.deliver_at > now {
                break;
            }
            let entry = self.in_flight.pop_front().unwrap();
            if entry.to_b {
                self.b.handle_datagram(self.addr_a, &entry.payload);
            } else {
                self.a.handle_datagram(self.addr_b, &entry.payload);
            }
            self.delivered += 1;
        }

        loop {
            let mut idle = true;
            while let Some(t) = self.a.poll_transmit() {
                idle = false;
                self.enqueue(t, now);
            }
            while let Some(t) = self.b.poll_transmit() {
                idle = false;
                self.enqueue(t, now);
            }
            if idle {
                break;
            }
        }
    }

    fn enqueue(&mut self, t: Transmit, now: Instant) {
        if let Some(f) = self.drop_fn.as_mut()
            && f(&t)
        {
            self.dropped += 1;
            return;
        }
        self.in_flight.push_back(InFlight {
            deliver_at: now + self.latency,
            to_b: t.to == self.addr_b,
            payload: t.payload,
        });
    }

    /// Advances virtual time in millisecond steps, pumping in between.
    pub fn run_for(&mut self, duration: Duration) {
        self.run_for_steps(duration, Duration::from_millis(1));
    }

    pub fn run_for_steps(&mut self, duration: Duration, step: Duration) {
        let mut elapsed = Duration::ZERO;
        while elapsed < duration {
            self.pump();
            self.time.advance(step);
            elapsed += step;
        }
        self.pump();
    }

    /// Runs until `check` yields a value or the virtual deadline passes.
    pub fn run_until<T>(
        &mut self,
        timeout: Duration,
        mut check: impl FnMut(&mut Self) -> Option<T>,
    ) -> Option<T> {
        let step = Duration::from_millis(1);
        let mut elapsed = Duration::ZERO;
        loop {
            self.pump();
            if let Some(value) = check(self) {
                return Some(value);
            }
            if elapsed >= timeout {
                return None;
            }
            self.time.advance(step);
            elapsed += step;
        }
    }

    pub fn a_events(&mut self) -> Vec<EndpointEvent> {
        let mut out = Vec::new();
        while let Some(ev) = self.a.poll_event() {
            out.push(ev);
        }
        out
    }

    pub fn b_events(&mut self) -> Vec<EndpointEvent> {
        let mut out = Vec::new();
        while let Some(ev) = self.b.poll_event() {
            out.push(ev);
        }
        out
    }

    /// Drains and returns everything readable on one stream of B.
    pub fn read_all_b(&mut self, id: ConnectionId, stream: StreamId) -> (Vec<u8>, bool) {
        let mut out = Vec::new();
        let mut finished = false;
        if let Some(conn) = self.b.connection_mut(id)
            && let Ok((data, fin)) = conn.read(stream)
        {
            out.extend_from_slice(&data);
            finished = fin;
        }
        (out, finished)
    }
}

/// Convenience: a config with keepalive off for quiet-link tests.
pub fn quiet_config() -> Config {
    Config {
        keepalive: false,
        ..Config::default()
    }
}

/// Flattens endpoint events into per-connection events.
pub fn stream_events(events: &[EndpointEvent]) -> Vec<(ConnectionId, ConnectionEvent)> {
    events
        .iter()
        .filter_map(|ev| match ev {
            EndpointEvent::Connection(id, ev) => Some((*id, ev.clone())),
            _ => None,
        })
        .collect()
}
