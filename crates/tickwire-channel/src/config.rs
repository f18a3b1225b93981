//! Channel-engine configuration.
//!
//! Plain structs with defaults; embedders fill what they need and load
//! the rest from files via serde. The ioctl enum is the runtime control
//! surface for knobs that can change after activation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tickwire_session::CompressionType;

/// Transport families the engine can be asked for.
///
/// Only `Socket` (plain TCP) and `Http` (TCP through an HTTP CONNECT
/// proxy) are implemented here; the rest are reserved for embedders
/// that supply their own byte transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionType {
    /// Plain TCP stream.
    #[default]
    Socket,
    /// TCP tunneled through an HTTP CONNECT proxy.
    Http,
    /// Pre-established TLS supplied by the embedder.
    Encrypted,
    /// Reliable multicast (not implemented).
    ReliableMcast,
    /// Shared memory (not implemented).
    Shmem,
    /// Sequenced multicast (not implemented).
    SeqMcast,
}

/// Default guaranteed output buffers per channel.
pub const DEFAULT_GUARANTEED_OUTPUT_BUFFERS: usize = 5000;
/// Default max fragment size, bytes.
pub const DEFAULT_MAX_FRAGMENT_SIZE: u16 = 6144;
/// Default high-water mark, bytes queued across all priorities.
pub const DEFAULT_HIGH_WATER_MARK: usize = 6144 * 10;
/// Default priority flush strategy.
pub const DEFAULT_FLUSH_STRATEGY: &str = "HMHLHM";
/// Default ping timeout.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(60);
/// Default messages per packed buffer.
pub const DEFAULT_PACK_COUNT: usize = 10;

/// Per-channel tuning shared by servers and clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Output buffers pre-allocated at activation.
    pub guaranteed_output_buffers: usize,
    /// Hard ceiling on pool growth; 0 means the guaranteed count is
    /// also the ceiling.
    pub max_output_buffers: usize,
    /// Largest frame payload, also the pool slab size.
    pub max_fragment_size: u16,
    /// Bytes queued across all priorities that trigger an auto-flush.
    pub high_water_mark: usize,
    /// Priority letters (H/M/L) consumed round-robin per flush tick.
    pub flush_strategy: String,
    /// Ping timeout proposal.
    pub ping_timeout: Duration,
    /// Compression this side offers or accepts.
    pub compression: CompressionType,
    /// zlib level, 0..=9.
    pub compression_level: u32,
    /// Payloads below this many bytes stay uncompressed.
    pub compression_threshold: u16,
    /// Never compress outgoing data, whatever the handshake settled on.
    pub force_compression_off: bool,
    /// Disable TCP_NODELAY (it defaults on).
    pub tcp_nodelay: bool,
    /// SO_SNDBUF; 0 keeps the OS default.
    pub send_buffer_size: usize,
    /// SO_RCVBUF; 0 keeps the OS default.
    pub recv_buffer_size: usize,
    /// Messages allowed in one packed buffer.
    pub pack_count: usize,
    /// Opaque component version advertised in the handshake.
    pub component_version: String,
    /// Tick interval for ping supervision and timed flushes.
    pub tick_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            guaranteed_output_buffers: DEFAULT_GUARANTEED_OUTPUT_BUFFERS,
            max_output_buffers: 0,
            max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            flush_strategy: DEFAULT_FLUSH_STRATEGY.to_string(),
            ping_timeout: DEFAULT_PING_TIMEOUT,
            compression: CompressionType::None,
            compression_level: 6,
            compression_threshold: 30,
            force_compression_off: false,
            tcp_nodelay: true,
            send_buffer_size: 0,
            recv_buffer_size: 0,
            pack_count: DEFAULT_PACK_COUNT,
            component_version: concat!("tickwire/", env!("CARGO_PKG_VERSION")).to_string(),
            tick_interval: Duration::from_millis(500),
        }
    }
}

/// Server bind options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindOptions {
    /// Address to listen on, e.g. `0.0.0.0:14002`.
    pub address: String,
    /// Allow other sockets to share the port (SO_REUSEPORT where
    /// supported).
    pub shared_socket: bool,
    /// Per-channel tuning applied to accepted connections.
    pub channel: ChannelConfig,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:14002".to_string(),
            shared_socket: false,
            channel: ChannelConfig::default(),
        }
    }
}

/// Proxy credentials and endpoint for tunneled connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyOptions {
    /// Proxy host.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Basic-auth user, when the proxy wants credentials.
    pub user: Option<String>,
    /// Basic-auth password.
    pub password: Option<String>,
    /// NTLM-style domain, prepended to the user when present.
    pub domain: Option<String>,
}

/// Client connect options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Transport family.
    pub connection_type: ConnectionType,
    /// Remote endpoint, e.g. `feed.example.com:14002`.
    pub address: String,
    /// Local interface to bind before connecting; empty for any.
    pub interface: String,
    /// Proxy to tunnel through; implies a tunnel dial thread.
    pub proxy: Option<ProxyOptions>,
    /// Ask for the version-14 key exchange.
    pub key_exchange: bool,
    /// Per-channel tuning.
    pub channel: ChannelConfig,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connection_type: ConnectionType::Socket,
            address: String::new(),
            interface: String::new(),
            proxy: None,
            key_exchange: false,
            channel: ChannelConfig::default(),
        }
    }
}

/// Runtime control codes, the post-activation knob surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ioctl {
    /// Ceiling on pool growth.
    MaxNumBuffers(usize),
    /// Guaranteed pool size.
    NumGuaranteedBuffers(usize),
    /// Auto-flush threshold in queued bytes.
    HighWaterMark(usize),
    /// SO_SNDBUF.
    SystemWriteBuffers(usize),
    /// SO_RCVBUF.
    SystemReadBuffers(usize),
    /// Engine debug flags (reserved bits logged, frame dumps).
    DebugFlags(u32),
    /// Priority letters consumed per flush tick.
    PriorityFlushOrder(String),
    /// Payloads below this many bytes stay uncompressed.
    CompressionThreshold(u16),
    /// Reset the pool's peak-usage counter.
    ResetPeakBuffers,
    /// Cap compression output at the input size plus slack, so
    /// incompressible data cannot grow past a frame.
    CompressionSafetyCap(bool),
    /// Skip certificate revocation checks on tunneled TLS.
    IgnoreCertRevocation(bool),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_knobs() {
        let config = ChannelConfig::default();
        assert_eq!(config.guaranteed_output_buffers, 5000);
        assert_eq!(config.max_fragment_size, 6144);
        assert!(config.tcp_nodelay);
        assert_eq!(config.flush_strategy, "HMHLHM");
    }

    #[test]
    fn connect_options_default_to_plain_sockets() {
        let options = ConnectOptions::default();
        assert_eq!(options.connection_type, ConnectionType::Socket);
        assert!(options.proxy.is_none());
        assert!(!options.key_exchange);
    }
}
