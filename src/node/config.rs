//! Node configuration
//!
//! Library-level settings for one overlay node. The CLI builds this from its
//! arguments; tests build it directly.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use crate::discovery::DiscoveryConfig;
use crate::error::ShareError;
use crate::protocol::MAX_PACKET_SIZE;
use crate::transfer::TransferConfig;

/// Default UDP port for discovery and search traffic
pub const DEFAULT_DISCOVERY_PORT: u16 = 55555;
/// Default UDP port for chunk and search-response traffic
pub const DEFAULT_CHUNK_PORT: u16 = 55556;
/// Default chunk size (4 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024;
/// Default hop budget for announcements and searches
pub const DEFAULT_FLOOD_TTL: i32 = 2;
/// Room reserved for header and metadata fields next to a full chunk
pub const PACKET_OVERHEAD_ALLOWANCE: usize = 1024;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Local IP both endpoints bind to
    pub bind_ip: IpAddr,
    /// Discovery/search endpoint port
    pub discovery_port: u16,
    /// Chunk/search-response endpoint port
    pub chunk_port: u16,
    /// Broadcast-style destinations; empty means limited broadcast on the discovery port
    pub broadcast_targets: Vec<SocketAddr>,
    /// IP advertised as the reply address; detected when unset
    pub advertise_ip: Option<IpAddr>,
    /// Bytes per chunk
    pub chunk_size: usize,
    /// Hop budget for announcements and searches
    pub flood_ttl: i32,
    /// Interval between presence announcements
    pub announce_interval: Duration,
    /// Discovery receive timeout
    pub receive_timeout: Duration,
    /// Optional bound on the seen-message cache
    pub seen_cache_capacity: Option<usize>,
    /// Download session timing and policy
    pub transfer: TransferConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            discovery_port: DEFAULT_DISCOVERY_PORT,
            chunk_port: DEFAULT_CHUNK_PORT,
            broadcast_targets: Vec::new(),
            advertise_ip: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            flood_ttl: DEFAULT_FLOOD_TTL,
            announce_interval: Duration::from_secs(5),
            receive_timeout: Duration::from_secs(2),
            seen_cache_capacity: None,
            transfer: TransferConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ShareError::config_error_with_field("chunk_size must be at least 1", "chunk_size").into());
        }
        if self.chunk_size + PACKET_OVERHEAD_ALLOWANCE > MAX_PACKET_SIZE {
            return Err(ShareError::config_error_with_field(
                format!("chunk_size must leave {} bytes of headroom below {}", PACKET_OVERHEAD_ALLOWANCE, MAX_PACKET_SIZE),
                "chunk_size",
            )
            .into());
        }
        if self.flood_ttl <= 0 {
            return Err(ShareError::config_error_with_field("flood_ttl must be positive", "flood_ttl").into());
        }
        if self.discovery_port != 0 && self.discovery_port == self.chunk_port {
            return Err(ShareError::config_error_with_field(
                "discovery and chunk ports must differ",
                "chunk_port",
            )
            .into());
        }
        if self.receive_timeout.is_zero() {
            return Err(ShareError::config_error_with_field("receive_timeout must be non-zero", "receive_timeout").into());
        }
        self.transfer.validate()?;
        Ok(())
    }

    pub fn discovery_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.discovery_port)
    }

    pub fn chunk_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.chunk_port)
    }

    /// Destinations for announcements, relays, and searches
    pub fn broadcast_targets(&self) -> Vec<SocketAddr> {
        if self.broadcast_targets.is_empty() {
            vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), self.discovery_port)]
        } else {
            self.broadcast_targets.clone()
        }
    }

    /// IP other nodes should reply to
    pub fn resolve_advertise_ip(&self) -> IpAddr {
        if let Some(ip) = self.advertise_ip {
            return ip;
        }
        if !self.bind_ip.is_unspecified() {
            return self.bind_ip;
        }
        detect_local_ip()
    }

    /// Settings for the discovery endpoint
    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            bind_addr: self.discovery_bind_addr(),
            targets: self.broadcast_targets(),
            ttl: self.flood_ttl,
            announce_interval: self.announce_interval,
            receive_timeout: self.receive_timeout,
            seen_cache_capacity: self.seen_cache_capacity,
        }
    }
}

/// Local address the OS would route an outbound flow through; no packet is sent
fn detect_local_ip() -> IpAddr {
    let routed = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).and_then(|socket| {
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        socket.local_addr()
    });
    match routed {
        Ok(addr) if !addr.ip().is_unspecified() => {
            debug!("Detected local IP {}", addr.ip());
            addr.ip()
        }
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            warn!("Failed to detect local IP, falling back to loopback: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}
