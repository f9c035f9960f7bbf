//! Server configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::relay::ChannelConfig;

/// Default port of the stream server
pub const DEFAULT_PORT: u16 = 8554;

/// Stream server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent client sessions (0 = unlimited)
    pub max_connections: usize,

    /// Time allowed to attach a new client to its mount
    pub connection_timeout: Duration,

    /// Interval of the session sweep
    pub session_sweep_interval: Duration,

    /// Per-mount fan-out buffer, in access units
    pub subscriber_buffer: usize,

    /// Enable GOP caching for late joiners
    pub catchup_enabled: bool,

    /// Maximum GOP cache size in bytes
    pub catchup_max_size: usize,

    /// Relay channel settings used for every mount
    pub channel: ChannelConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            connection_timeout: Duration::from_secs(10),
            session_sweep_interval: Duration::from_secs(2),
            subscriber_buffer: 256,
            catchup_enabled: true,
            catchup_max_size: 4 * 1024 * 1024, // 4MB
            channel: ChannelConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the client attach timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the session sweep interval
    pub fn session_sweep_interval(mut self, interval: Duration) -> Self {
        self.session_sweep_interval = interval;
        self
    }

    /// Disable GOP caching
    pub fn disable_catchup(mut self) -> Self {
        self.catchup_enabled = false;
        self
    }

    /// Set the relay channel settings
    pub fn channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    /// Base URL clients reach the mounts under
    ///
    /// An unspecified bind address is reported as loopback.
    pub fn base_url(&self) -> String {
        let ip = match self.bind_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            ip => ip,
        };
        format!("http://{}", SocketAddr::new(ip, self.bind_addr.port()))
    }
}
