//! Node module
//!
//! Coordinator, outbound sends, notification sinks, configuration and the
//! lifecycle facade of one overlay node.

pub mod config;
pub mod coordinator;
pub mod lifecycle;
pub mod outbound;
pub mod sinks;

// Re-exports for convenience
pub use config::{
    NodeConfig, DEFAULT_CHUNK_PORT, DEFAULT_CHUNK_SIZE, DEFAULT_DISCOVERY_PORT, DEFAULT_FLOOD_TTL,
    PACKET_OVERHEAD_ALLOWANCE,
};
pub use coordinator::{NodeCoordinator, PacketHandler, PeerRecord, ShareSettings};
pub use lifecycle::Node;
pub use outbound::{ChunkRequester, Outbound, Transport, UdpTransport};
pub use sinks::{LogSink, ProgressSink, ResultsSink};
