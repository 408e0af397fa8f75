//! peershare
//!
//! A LAN peer-to-peer file-sharing node: broadcast discovery, flooded search
//! with duplicate suppression, and chunked UDP downloads from one or many peers.

pub mod protocol;
pub mod discovery;
pub mod storage;
pub mod transfer;
pub mod node;
pub mod cli;
pub mod error;

pub use error::ShareError;

pub use protocol::{Packet, PacketType, SearchRecord, MAX_PACKET_SIZE};
pub use discovery::{Admission, DiscoveryConfig, DiscoveryService, FloodFilter, NodeId, SeenCache};
pub use storage::{ContentIdentifier, DownloadMasks, FileCatalog, FileRecord, Sha1Identifier};
pub use transfer::{ChunkAssembly, PartialDownloadPolicy, TransferConfig};
pub use node::{
    LogSink, Node, NodeConfig, NodeCoordinator, PacketHandler, PeerRecord, ProgressSink, ResultsSink,
};
pub use cli::{CliArgs, Config, ProgressDisplay};
