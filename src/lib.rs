//! # Riptide
//!
//! A reliable, multiplexed, encrypted transport built on top of UDP.
//!
//! The engine is sans-io: it never touches a socket or a timer. A host feeds
//! it received datagrams and ICMP error-queue messages, drains outgoing
//! datagrams, and calls back at the deadline reported by `next_wakeup`.
//!
//! ## Architecture
//!
//! - **Reliability**: per-packet ACK ranges, reordering- and time-threshold
//!   loss detection, PTO probes.
//! - **Congestion control**: BBRv1 with per-packet bandwidth sampling and
//!   DPLPMTUD path-MTU probing.
//! - **Multiplexing**: bidirectional streams with connection- and
//!   stream-level flow control, scheduled by deficit round robin.
//! - **Confidentiality**: AES-256-GCM packet protection keyed by an X25519
//!   agreement carried in CRYPTO frames.

pub mod config;
pub mod congestion;
pub mod connection;
pub mod crypto;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod mtu;
pub mod packet;
pub mod path;
pub mod pool;
pub mod ranges;
pub mod recovery;
pub mod rtt;
pub mod scheduler;
pub mod stream;
pub mod time;
pub mod wire;

use std::time::Duration;

macro_rules! id_newtype {
    ($name:ident, $inner:ty, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub $inner);

        impl From<$inner> for $name {
            fn from(val: $inner) -> Self {
                $name(val)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(
    ConnectionId,
    u32,
    "Local connection identifier, routing key for incoming datagrams."
);
id_newtype!(StreamId, u16, "Identifier of a bidirectional stream.");

/// Events surfaced to the application by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The handshake completed and application data may flow.
    Connected,
    /// The peer opened a stream.
    StreamOpened(StreamId),
    /// Ordered bytes became readable on a stream.
    StreamReadable(StreamId),
    /// Flow-control credit or buffer space opened up on a stream.
    StreamWritable(StreamId),
    /// The peer reset a stream.
    StreamReset(StreamId, u16),
    /// The responder issued a resumption token.
    SessionToken {
        token: [u8; 32],
        lifetime: Duration,
    },
    /// The connection finished closing (after draining).
    Closed(error::TransportError),
}

pub use config::{Config, ConfigUpdate, SocketOptions};
pub use connection::{Connection, ConnectionStats};
pub use endpoint::{Endpoint, EndpointEvent, SocketError, Transmit};
pub use error::TransportError;
pub use frame::Frame;
pub use time::{ManualTimeProvider, SystemTimeProvider, TimeProvider};
