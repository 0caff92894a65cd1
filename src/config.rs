use std::time::Duration;

/// Wire protocol version carried in every packet header.
pub const PROTOCOL_VERSION: u32 = 0x0000_0001;

/// Conservative IPv4 starting MSS.
pub const INITIAL_MSS: usize = 1400;
/// IPv6 minimum MTU floor.
pub const MIN_MSS: usize = 1280;
/// Upper MSS cap, reachable on loopback paths only.
pub const LOCALHOST_MSS: usize = 65536;

/// Transport tuning knobs with the protocol defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Use the aggressive minimum RTO (30 ms instead of 100 ms).
    pub nodelay: bool,
    pub initial_rto: Duration,
    pub max_rto: Duration,

    pub initial_mss: usize,
    /// Receive window in packets. Must cover the largest fragment count.
    pub recv_window_packets: usize,
    /// Send window in packets.
    pub send_window_packets: usize,

    pub keepalive: bool,
    pub keepalive_interval: Duration,
    /// Keepalive timeout as a multiple of smoothed RTT.
    pub keepalive_timeout_rtt_mult: u32,
    pub max_keepalive_retries: u32,

    pub handshake_retries: u32,
    pub close_retries: u32,
    pub handshake_timeout: Duration,
    pub idle_timeout: Duration,

    pub mtu_probe_timeout: Duration,
    pub mtu_probe_retries: u32,
    /// Stop probing once the unexplored MTU interval is this small.
    pub mtu_probe_granularity: usize,

    /// Send an ACK after this many ack-eliciting packets.
    pub ack_eliciting_threshold: u8,
    /// Packet-number distance before a hole is declared lost.
    pub reordering_threshold: u8,
    pub max_ack_delay: Duration,
    /// Times a single packet may be fast-retransmitted before falling back
    /// to timer-driven recovery.
    pub fast_retransmit_limit: u32,
    /// PTO ladder length before the connection gives up.
    pub max_retransmissions: u32,

    /// Connection-level receive credit advertised to the peer.
    pub initial_max_data: u64,
    /// Per-stream receive credit advertised to the peer.
    pub initial_max_stream_data: u64,
    /// Maximum concurrent bidirectional streams accepted from the peer.
    pub max_streams: u16,

    /// Bytes a stream will buffer on the send side before `write` reports
    /// back-pressure.
    pub stream_send_buffer: usize,

    /// Outgoing packet records available per connection.
    pub packet_pool_size: usize,
    /// Largest burst released at once when the pacer has fallen behind.
    pub pacing_burst_packets: usize,

    /// Seconds a freshly minted session token stays valid. Zero selects the
    /// wire maximum of `u16::MAX` seconds (about 18.2 hours).
    pub session_token_secs: u16,
}

impl Default for Config {
    fn default() -> Self {
        let recv_window_packets = 128;
        Self {
            nodelay: false,
            initial_rto: Duration::from_millis(200),
            max_rto: Duration::from_secs(6),
            initial_mss: INITIAL_MSS,
            recv_window_packets,
            send_window_packets: 32,
            keepalive: true,
            keepalive_interval: Duration::from_secs(10),
            keepalive_timeout_rtt_mult: 10,
            max_keepalive_retries: 5,
            handshake_retries: 2,
            close_retries: 2,
            handshake_timeout: Duration::from_secs(6),
            idle_timeout: Duration::from_secs(30),
            mtu_probe_timeout: Duration::from_millis(1500),
            mtu_probe_retries: 3,
            mtu_probe_granularity: 16,
            ack_eliciting_threshold: 2,
            reordering_threshold: 3,
            max_ack_delay: Duration::from_millis(25),
            fast_retransmit_limit: 5,
            max_retransmissions: 5,
            initial_max_data: (recv_window_packets * INITIAL_MSS) as u64,
            initial_max_stream_data: (recv_window_packets * INITIAL_MSS / 2) as u64,
            max_streams: 16,
            stream_send_buffer: 256 * 1024,
            packet_pool_size: 256,
            pacing_burst_packets: 10,
            session_token_secs: 0,
        }
    }
}

impl Config {
    /// Minimum retransmission timeout for the current delay mode.
    pub fn min_rto(&self) -> Duration {
        if self.nodelay {
            Duration::from_millis(30)
        } else {
            Duration::from_millis(100)
        }
    }

    /// Applies a partial update. Fields the update leaves unset keep their
    /// current values.
    pub fn apply(&mut self, update: &ConfigUpdate) {
        if let Some(nodelay) = update.nodelay {
            self.nodelay = nodelay;
        }
        if let Some(keepalive) = update.keepalive {
            self.keepalive = keepalive;
        }
        if let Some(interval) = update.keepalive_interval {
            self.keepalive_interval = interval;
        }
        if let Some(idle) = update.idle_timeout {
            self.idle_timeout = idle;
        }
        if let Some(threshold) = update.ack_eliciting_threshold {
            self.ack_eliciting_threshold = threshold;
        }
        if let Some(delay) = update.max_ack_delay {
            self.max_ack_delay = delay;
        }
        if let Some(timeout) = update.mtu_probe_timeout {
            self.mtu_probe_timeout = timeout;
        }
        if let Some(retries) = update.mtu_probe_retries {
            self.mtu_probe_retries = retries;
        }
        if let Some(window) = update.send_window_packets {
            self.send_window_packets = window;
        }
        if let Some(window) = update.recv_window_packets {
            self.recv_window_packets = window;
        }
    }
}

/// Partial configuration change; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub nodelay: Option<bool>,
    pub keepalive: Option<bool>,
    pub keepalive_interval: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub ack_eliciting_threshold: Option<u8>,
    pub max_ack_delay: Option<Duration>,
    pub mtu_probe_timeout: Option<Duration>,
    pub mtu_probe_retries: Option<u32>,
    pub send_window_packets: Option<usize>,
    pub recv_window_packets: Option<usize>,
}

/// Socket configuration the host must apply to the UDP socket backing an
/// endpoint. The engine itself never opens sockets.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Set the don't-fragment bit so MTU probes fail loudly.
    pub dont_fragment: bool,
    pub nonblocking: bool,
    /// Subscribe to the kernel error queue (`IP_RECVERR` / `IPV6_RECVERR`)
    /// and feed messages to `Endpoint::handle_socket_error`.
    pub recv_error: bool,
    pub ipv6_only: bool,
    pub bind_interface: Option<String>,
    pub send_buffer: Option<usize>,
    pub recv_buffer: Option<usize>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            dont_fragment: true,
            nonblocking: true,
            recv_error: true,
            ipv6_only: false,
            bind_interface: None,
            send_buffer: Some(1 << 20),
            recv_buffer: Some(1 << 20),
        }
    }
}
