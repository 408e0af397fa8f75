//! Node lifecycle
//!
//! [`Node`] wires a coordinator to its two datagram endpoints and exposes the
//! lifecycle controls: folder settings, connect, disconnect and shutdown.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::discovery::{DiscoveryService, NodeId};
use crate::node::config::NodeConfig;
use crate::node::coordinator::{NodeCoordinator, PacketHandler, PeerRecord};
use crate::node::outbound::{Outbound, UdpTransport};
use crate::node::sinks::{ProgressSink, ResultsSink};
use crate::storage::{ContentIdentifier, DownloadMasks, FileRecord, Sha1Identifier};
use crate::transfer::{bind_chunk_socket, ChunkEndpoint};

struct Links {
    discovery: DiscoveryService,
    chunk: ChunkEndpoint,
}

/// One overlay participant
pub struct Node {
    config: NodeConfig,
    outbound: Arc<Outbound>,
    coordinator: Arc<NodeCoordinator>,
    links: Mutex<Option<Links>>,
}

impl Node {
    /// Create a node that identifies files by SHA-1
    pub fn new(config: NodeConfig, results: Arc<dyn ResultsSink>, progress: Arc<dyn ProgressSink>) -> Result<Self> {
        Self::with_identifier(config, Arc::new(Sha1Identifier), results, progress)
    }

    pub fn with_identifier(
        config: NodeConfig,
        identifier: Arc<dyn ContentIdentifier>,
        results: Arc<dyn ResultsSink>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        config.validate()?;
        let node_id = NodeId::random();
        info!("Node id {}", node_id);
        let outbound = Arc::new(Outbound::new(node_id, config.flood_ttl, config.broadcast_targets()));
        let coordinator = Arc::new(NodeCoordinator::new(&config, outbound.clone(), identifier, results, progress));
        Ok(Self {
            config,
            outbound,
            coordinator,
            links: Mutex::new(None),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.outbound.node_id()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<NodeCoordinator> {
        &self.coordinator
    }

    pub async fn set_root_folder(&self, root: impl Into<PathBuf>) {
        self.coordinator.set_root_folder(root).await;
    }

    pub async fn set_destination_folder(&self, destination: impl Into<PathBuf>) {
        self.coordinator.set_destination_folder(destination).await;
    }

    pub async fn set_excluded_subfolders(&self, excluded: Vec<PathBuf>) {
        self.coordinator.set_excluded_subfolders(excluded).await;
    }

    pub async fn set_download_masks(&self, masks: DownloadMasks) {
        self.coordinator.set_download_masks(masks).await;
    }

    /// Rescan the root folder, bind both endpoints and start announcing.
    /// Does nothing when already connected.
    pub async fn connect(&self) -> Result<()> {
        let mut links = self.links.lock().await;
        if links.is_some() {
            debug!("Already connected");
            return Ok(());
        }

        let shared = self.coordinator.rescan().await;
        info!("Sharing {} files", shared);

        let socket = bind_chunk_socket(self.config.chunk_bind_addr()).await?;
        let chunk_addr = socket.local_addr()?;
        let reply_addr = SocketAddr::new(self.config.resolve_advertise_ip(), chunk_addr.port()).to_string();
        self.outbound
            .attach(Arc::new(UdpTransport::new(socket.clone())), reply_addr.clone())
            .await;

        let handler: Arc<dyn PacketHandler> = self.coordinator.clone();
        let chunk = match ChunkEndpoint::start(socket, handler.clone()) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.outbound.detach().await;
                return Err(e);
            }
        };
        let discovery =
            match DiscoveryService::start(self.config.discovery_config(), self.node_id(), reply_addr.clone(), handler).await {
                Ok(discovery) => discovery,
                Err(e) => {
                    chunk.stop().await;
                    self.outbound.detach().await;
                    return Err(e);
                }
            };

        info!("Connected as {} (reply address {})", self.node_id(), reply_addr);
        *links = Some(Links { discovery, chunk });
        Ok(())
    }

    /// Stop discovery and close the chunk endpoint. Does nothing when not connected.
    pub async fn disconnect(&self) {
        let Some(links) = self.links.lock().await.take() else {
            debug!("Not connected");
            return;
        };
        links.discovery.stop().await;
        links.chunk.stop().await;
        self.outbound.detach().await;
        info!("Disconnected");
    }

    /// Disconnect and abort every download session
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.coordinator.abort_sessions().await;
        info!("Node {} shut down", self.node_id());
    }

    pub async fn is_connected(&self) -> bool {
        self.links.lock().await.is_some()
    }

    pub async fn discovery_addr(&self) -> Option<SocketAddr> {
        self.links.lock().await.as_ref().map(|links| links.discovery.local_addr())
    }

    pub async fn chunk_addr(&self) -> Option<SocketAddr> {
        self.links.lock().await.as_ref().map(|links| links.chunk.local_addr())
    }

    pub async fn search_file(&self, query: &str) -> Result<()> {
        self.coordinator.search_file(query).await
    }

    pub async fn download_file(&self, file_id: &str, size: u64, peers: Option<Vec<SocketAddr>>) -> Result<()> {
        self.coordinator.download_file(file_id, size, peers).await
    }

    pub async fn is_downloading(&self, file_id: &str) -> bool {
        self.coordinator.is_downloading(file_id).await
    }

    pub async fn peers_for_file(&self, file_id: &str) -> Vec<PeerRecord> {
        self.coordinator.peers_for_file(file_id).await
    }

    pub async fn known_nodes(&self) -> HashMap<String, String> {
        self.coordinator.known_nodes().await
    }

    pub async fn shared_files(&self) -> Vec<FileRecord> {
        self.coordinator.shared_files().await
    }
}
