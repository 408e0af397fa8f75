//! Node coordinator
//!
//! Single dispatch point for inbound traffic from both endpoints. Owns the
//! shared-file catalog, the peer-availability index, known nodes and the
//! in-flight download table, all behind one lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

use crate::discovery::NodeId;
use crate::error::ShareError;
use crate::node::config::NodeConfig;
use crate::node::outbound::{ChunkRequester, Outbound};
use crate::node::sinks::{ProgressSink, ResultsSink};
use crate::protocol::{batch_records, parse_records, Packet, PacketType};
use crate::storage::{read_chunk, ContentIdentifier, DownloadMasks, FileCatalog, FileRecord};
use crate::transfer::{
    ChunkAssembly, ChunkOutcome, DownloadSession, MultiSourceSession, SingleSourceSession, TransferConfig,
};

/// Receives every packet an endpoint accepts
#[async_trait]
pub trait PacketHandler: Send + Sync {
    async fn handle_packet(&self, packet: Packet, from: SocketAddr);
}

/// A node known to hold a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Chunk endpoint of the holder
    pub addr: SocketAddr,
    /// Size the holder advertised
    pub size: u64,
}

/// Folders and filters set through the lifecycle controls
#[derive(Debug, Clone, Default)]
pub struct ShareSettings {
    pub root: Option<PathBuf>,
    pub destination: Option<PathBuf>,
    pub excluded: Vec<PathBuf>,
    pub masks: DownloadMasks,
}

#[derive(Default)]
struct CoordinatorState {
    settings: ShareSettings,
    catalog: FileCatalog,
    /// Holders per identifier, in the order they were learned
    peers: HashMap<String, Vec<PeerRecord>>,
    /// Display names learned from search responses
    names: HashMap<String, String>,
    /// Node id to reply address, from announcements
    known_nodes: HashMap<String, String>,
    downloads: HashMap<String, Arc<ChunkAssembly>>,
    sessions: JoinSet<()>,
}

/// Where a reply to `packet` should go
fn reply_target(packet: &Packet, from: SocketAddr) -> SocketAddr {
    packet.originator_addr.parse().unwrap_or(from)
}

pub struct NodeCoordinator {
    node_id: NodeId,
    chunk_size: usize,
    transfer: TransferConfig,
    outbound: Arc<Outbound>,
    identifier: Arc<dyn ContentIdentifier>,
    results: Arc<dyn ResultsSink>,
    progress: Arc<dyn ProgressSink>,
    state: Mutex<CoordinatorState>,
}

impl NodeCoordinator {
    pub fn new(
        config: &NodeConfig,
        outbound: Arc<Outbound>,
        identifier: Arc<dyn ContentIdentifier>,
        results: Arc<dyn ResultsSink>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            node_id: outbound.node_id(),
            chunk_size: config.chunk_size,
            transfer: config.transfer.clone(),
            outbound,
            identifier,
            results,
            progress,
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub async fn set_root_folder(&self, root: impl Into<PathBuf>) {
        let root = root.into();
        info!("Root folder set to {}", root.display());
        self.state.lock().await.settings.root = Some(root);
    }

    pub async fn set_destination_folder(&self, destination: impl Into<PathBuf>) {
        let destination = destination.into();
        info!("Destination folder set to {}", destination.display());
        self.state.lock().await.settings.destination = Some(destination);
    }

    pub async fn set_excluded_subfolders(&self, excluded: Vec<PathBuf>) {
        debug!("Excluding {} subfolders", excluded.len());
        self.state.lock().await.settings.excluded = excluded;
    }

    pub async fn set_download_masks(&self, masks: DownloadMasks) {
        self.state.lock().await.settings.masks = masks;
    }

    pub async fn settings(&self) -> ShareSettings {
        self.state.lock().await.settings.clone()
    }

    /// Rebuild the catalog from the root folder. A missing or unreadable
    /// root leaves the catalog empty.
    pub async fn rescan(&self) -> usize {
        let settings = self.settings().await;
        let catalog = match settings.root {
            Some(root) => match FileCatalog::scan(root.clone(), settings.excluded, self.identifier.clone()).await {
                Ok(catalog) => catalog,
                Err(e) => {
                    warn!("Failed to scan {}: {}", root.display(), e);
                    FileCatalog::new()
                }
            },
            None => {
                warn!("No root folder set, sharing nothing");
                FileCatalog::new()
            }
        };
        let count = catalog.len();
        self.state.lock().await.catalog = catalog;
        count
    }

    pub async fn shared_files(&self) -> Vec<FileRecord> {
        let state = self.state.lock().await;
        let mut files: Vec<FileRecord> = state.catalog.records().cloned().collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        files
    }

    /// Node id to reply address of every node heard announcing
    pub async fn known_nodes(&self) -> HashMap<String, String> {
        self.state.lock().await.known_nodes.clone()
    }

    /// Holders of `file_id` learned from search responses
    pub async fn peers_for_file(&self, file_id: &str) -> Vec<PeerRecord> {
        self.state.lock().await.peers.get(file_id).cloned().unwrap_or_default()
    }

    pub async fn is_downloading(&self, file_id: &str) -> bool {
        let assembly = self.state.lock().await.downloads.get(file_id).cloned();
        match assembly {
            Some(assembly) => assembly.is_active().await,
            None => false,
        }
    }

    /// Flood a search for `query`
    pub async fn search_file(&self, query: &str) -> Result<()> {
        info!("Searching for '{}'", query);
        self.outbound.search(query).await
    }

    /// Ask `peer` for one chunk of `file_id`
    pub async fn request_chunk(&self, peer: SocketAddr, file_id: &str, index: i32) -> Result<()> {
        self.outbound.request_chunk(peer, file_id, index).await
    }

    /// Start downloading `file_id`. With `peers`, chunks are spread across
    /// them; otherwise the first known holder serves every chunk.
    pub async fn download_file(&self, file_id: &str, size: u64, peers: Option<Vec<SocketAddr>>) -> Result<()> {
        let mut state = self.state.lock().await;

        let destination = match state.settings.destination.clone() {
            Some(destination) => destination,
            None => {
                warn!("Download of {} rejected: no destination folder", file_id);
                return Err(ShareError::download_error_for("No destination folder set", file_id).into());
            }
        };

        if let Some(existing) = state.downloads.get(file_id) {
            if existing.is_active().await {
                warn!("Download of {} rejected: already in progress", file_id);
                return Err(ShareError::download_error_for("Download already in progress", file_id).into());
            }
        }

        if let Some(name) = state.names.get(file_id) {
            if state.settings.masks.matches(name) {
                warn!("Download of {} rejected: '{}' matches a download mask", file_id, name);
                return Err(ShareError::download_error_for(format!("'{}' is excluded by a download mask", name), file_id).into());
            }
        }

        if let Err(e) = self.transfer.check_download_size(file_id, size, self.chunk_size) {
            warn!("Download of {} rejected: {}", file_id, e);
            return Err(e);
        }

        let assembly = Arc::new(ChunkAssembly::new(file_id, size, self.chunk_size, &destination, self.progress.clone()));
        let requester: Arc<dyn ChunkRequester> = self.outbound.clone();
        let session = match peers {
            Some(peers) => DownloadSession::Multi(MultiSourceSession::new(
                assembly.clone(),
                peers,
                requester,
                self.transfer.multi_source_pacing,
            )?),
            None => {
                let holder = match state.peers.get(file_id).and_then(|holders| holders.first()) {
                    Some(holder) => holder.addr,
                    None => {
                        warn!("Download of {} rejected: no known holder", file_id);
                        return Err(ShareError::download_error_for("No known peer holds this file", file_id).into());
                    }
                };
                DownloadSession::Single(SingleSourceSession::new(
                    assembly.clone(),
                    holder,
                    requester,
                    self.transfer.clone(),
                ))
            }
        };

        info!(
            "Starting {} download of {} ({} bytes)",
            if session.is_multi_source() { "multi-source" } else { "single-source" },
            file_id,
            size
        );
        state.downloads.insert(file_id.to_string(), assembly);
        let file_id = file_id.to_string();
        state.sessions.spawn(async move {
            if let Err(e) = session.run().await {
                error!("Download of {} failed: {}", file_id, e);
            }
        });
        Ok(())
    }

    /// Abort every running session task
    pub async fn abort_sessions(&self) {
        let mut state = self.state.lock().await;
        if !state.sessions.is_empty() {
            debug!("Aborting {} session tasks", state.sessions.len());
        }
        state.sessions.abort_all();
    }

    async fn handle_discovery(&self, packet: Packet) {
        if packet.node_id.is_empty() {
            return;
        }
        let mut state = self.state.lock().await;
        if state.known_nodes.insert(packet.node_id.clone(), packet.originator_addr.clone()).is_none() {
            info!("Discovered node {} at {}", packet.node_id, packet.originator_addr);
        }
    }

    async fn handle_search(&self, packet: Packet, from: SocketAddr) {
        let matches = self.state.lock().await.catalog.search(&packet.text);
        if matches.is_empty() {
            trace!("No match for '{}'", packet.text);
            return;
        }

        let target = reply_target(&packet, from);
        let budget = match self.outbound.reply_text_budget().await {
            Ok(budget) => budget,
            Err(e) => {
                warn!("Cannot answer search from {}: {}", target, e);
                return;
            }
        };
        let batches = batch_records(&matches, budget);
        debug!(
            "Answering '{}' from {} with {} records in {} responses",
            packet.text,
            target,
            matches.len(),
            batches.len()
        );
        for text in batches {
            if let Err(e) = self.outbound.reply(PacketType::SearchResponse, target, |p| p.with_text(text)).await {
                warn!("Failed to answer search from {}: {}", target, e);
            }
        }
    }

    async fn handle_search_response(&self, packet: Packet, from: SocketAddr) {
        let holder = reply_target(&packet, from);
        let records = parse_records(&packet.text);
        {
            let mut state = self.state.lock().await;
            for record in &records {
                let peer = PeerRecord { addr: holder, size: record.size };
                let holders = state.peers.entry(record.file_id.clone()).or_default();
                if !holders.contains(&peer) {
                    holders.push(peer);
                    debug!("{} holds {} ({})", holder, record.file_id, record.name);
                }
                state.names.insert(record.file_id.clone(), record.name.clone());
            }
        }
        if !records.is_empty() {
            self.results.report_results(&packet.text);
        }
    }

    async fn handle_chunk_request(&self, packet: Packet, from: SocketAddr) {
        let record = self.state.lock().await.catalog.get(&packet.file_id).cloned();
        let Some(record) = record else {
            trace!("Chunk request for unknown file {}", packet.file_id);
            return;
        };

        let payload = match read_chunk(&record.path, packet.chunk_index, self.chunk_size).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serve chunk {} of {}: {}", packet.chunk_index, record.file_id, e);
                return;
            }
        };

        let target = reply_target(&packet, from);
        trace!("Serving chunk {} of {} ({} bytes) to {}", packet.chunk_index, record.file_id, payload.len(), target);
        let result = self
            .outbound
            .reply(PacketType::ChunkResponse, target, |p| {
                p.with_file(record.file_id.clone(), record.size)
                    .with_chunk(packet.chunk_index, Some(payload))
            })
            .await;
        if let Err(e) = result {
            warn!("Failed to send chunk {} of {} to {}: {}", packet.chunk_index, record.file_id, target, e);
        }
    }

    async fn handle_chunk_response(&self, packet: Packet) {
        let assembly = self.state.lock().await.downloads.get(&packet.file_id).cloned();
        let Some(assembly) = assembly else {
            trace!("Chunk {} for {} with no session", packet.chunk_index, packet.file_id);
            return;
        };
        match assembly.handle_chunk(packet.chunk_index, packet.chunk_payload.unwrap_or_default()).await {
            Ok(ChunkOutcome::Completed) => info!("Download of {} finished", packet.file_id),
            Ok(outcome) => trace!("Chunk {} of {}: {:?}", packet.chunk_index, packet.file_id, outcome),
            Err(e) => error!("Failed to store chunk {} of {}: {}", packet.chunk_index, packet.file_id, e),
        }
    }
}

#[async_trait]
impl PacketHandler for NodeCoordinator {
    async fn handle_packet(&self, packet: Packet, from: SocketAddr) {
        if self.node_id.matches(&packet.node_id) {
            trace!("Ignoring own {} seq={}", packet.packet_type, packet.sequence);
            return;
        }
        match packet.packet_type {
            PacketType::Discovery => self.handle_discovery(packet).await,
            PacketType::Search => self.handle_search(packet, from).await,
            PacketType::SearchResponse => self.handle_search_response(packet, from).await,
            PacketType::ChunkRequest => self.handle_chunk_request(packet, from).await,
            PacketType::ChunkResponse => self.handle_chunk_response(packet).await,
            PacketType::Other => debug!("Dropping {} seq={} from {}", packet.packet_type, packet.sequence, from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::outbound::tests::RecordingTransport;
    use crate::node::sinks::LogSink;
    use crate::storage::Sha1Identifier;
    use crate::transfer::assembly::tests::RecordingProgress;
    use std::sync::Mutex as StdMutex;

    const REPLY_ADDR: &str = "127.0.0.1:4000";
    const SOURCE_ID: &str = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";

    #[derive(Default)]
    struct RecordingResults {
        texts: StdMutex<Vec<String>>,
    }

    impl ResultsSink for RecordingResults {
        fn report_results(&self, text: &str) {
            self.texts.lock().unwrap().push(text.to_string());
        }
    }

    struct Fixture {
        coordinator: NodeCoordinator,
        transport: Arc<RecordingTransport>,
        results: Arc<RecordingResults>,
        root: PathBuf,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    async fn fixture() -> Fixture {
        let root = std::env::temp_dir().join(format!("peershare_coord_{}", rand::random::<u32>()));
        std::fs::create_dir_all(root.join("share")).unwrap();
        std::fs::write(root.join("share/hello.txt"), b"hello world").unwrap();

        let config = NodeConfig { chunk_size: 4, ..NodeConfig::default() };
        let transport = Arc::new(RecordingTransport::default());
        let outbound = Arc::new(Outbound::new(NodeId::new([1u8; 20]), 2, vec!["127.0.0.1:9".parse().unwrap()]));
        outbound.attach(transport.clone(), REPLY_ADDR.to_string()).await;
        let results = Arc::new(RecordingResults::default());
        let coordinator = NodeCoordinator::new(
            &config,
            outbound,
            Arc::new(Sha1Identifier),
            results.clone(),
            Arc::new(LogSink),
        );
        coordinator.set_root_folder(root.join("share")).await;
        assert_eq!(coordinator.rescan().await, 1);

        Fixture {
            coordinator,
            transport,
            results,
            root,
        }
    }

    fn remote(packet_type: PacketType) -> Packet {
        Packet::new(packet_type, 2, "127.0.0.1:7000").with_node_id(NodeId::new([9u8; 20]).to_hex())
    }

    fn source() -> SocketAddr {
        "127.0.0.1:7777".parse().unwrap()
    }

    #[tokio::test]
    async fn test_search_match_sends_one_response() {
        let f = fixture().await;
        f.coordinator.handle_packet(remote(PacketType::Search).with_text("HELLO"), source()).await;

        let sent = f.transport.sent.lock().await;
        assert_eq!(sent.len(), 1);
        let (target, response) = &sent[0];
        assert_eq!(*target, "127.0.0.1:7000".parse::<SocketAddr>().unwrap());
        assert_eq!(response.packet_type, PacketType::SearchResponse);
        let records = parse_records(&response.text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].file_id, SOURCE_ID);
        assert_eq!(records[0].size, 11);
    }

    #[tokio::test]
    async fn test_large_match_set_split_across_responses() {
        let f = fixture().await;
        let padding = "x".repeat(200);
        for i in 0..400 {
            std::fs::write(f.root.join(format!("share/report-{:03}-{}.txt", i, padding)), i.to_string()).unwrap();
        }
        assert_eq!(f.coordinator.rescan().await, 401);

        f.coordinator.handle_packet(remote(PacketType::Search).with_text("report"), source()).await;

        let sent = f.transport.sent.lock().await;
        assert!(sent.len() > 1);
        assert!(sent.iter().all(|(_, p)| p.packet_type == PacketType::SearchResponse));
        let mut names: Vec<String> = sent
            .iter()
            .flat_map(|(_, p)| parse_records(&p.text))
            .map(|r| r.name)
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 400);
        assert!(names.iter().all(|n| n.starts_with("report-")));
    }

    #[tokio::test]
    async fn test_download_rejects_oversized_advertisement() {
        let f = fixture().await;
        f.coordinator.set_destination_folder(f.root.join("dest")).await;
        f.coordinator
            .handle_packet(remote(PacketType::SearchResponse).with_text("evil.bin|abc|18446744073709551615\n"), source())
            .await;
        let holder = f.coordinator.peers_for_file("abc").await[0];
        assert_eq!(holder.size, u64::MAX);

        let err = f.coordinator.download_file("abc", holder.size, None).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ShareError>(), Some(ShareError::DownloadError { .. })));
        let err = f
            .coordinator
            .download_file("abc", holder.size, Some(vec![holder.addr]))
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<ShareError>(), Some(ShareError::DownloadError { .. })));
        assert!(!f.coordinator.is_downloading("abc").await);

        // A sane size from the same holder still starts
        f.coordinator.download_file("abc", 10, None).await.unwrap();
        assert!(f.coordinator.is_downloading("abc").await);
        f.coordinator.abort_sessions().await;
    }

    #[tokio::test]
    async fn test_search_without_match_is_silent() {
        let f = fixture().await;
        f.coordinator.handle_packet(remote(PacketType::Search).with_text("absent"), source()).await;
        assert!(f.transport.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_self_originated_search_ignored() {
        let f = fixture().await;
        let own = Packet::new(PacketType::Search, 2, REPLY_ADDR)
            .with_node_id(NodeId::new([1u8; 20]).to_hex())
            .with_text("hello");
        f.coordinator.handle_packet(own, source()).await;
        assert!(f.transport.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_search_response_indexes_holders() {
        let f = fixture().await;
        let text = "movie.mkv|abc|100\nnotes.txt|def|5\n";
        let response = remote(PacketType::SearchResponse).with_text(text);
        f.coordinator.handle_packet(response.clone(), source()).await;
        f.coordinator.handle_packet(response, source()).await;

        let holders = f.coordinator.peers_for_file("abc").await;
        assert_eq!(holders, vec![PeerRecord { addr: "127.0.0.1:7000".parse().unwrap(), size: 100 }]);
        assert_eq!(f.coordinator.peers_for_file("def").await.len(), 1);
        assert!(f.coordinator.peers_for_file("zzz").await.is_empty());
        assert_eq!(f.results.texts.lock().unwrap().as_slice(), &[text.to_string(), text.to_string()]);
    }

    #[tokio::test]
    async fn test_unparseable_reply_address_falls_back_to_source() {
        let f = fixture().await;
        let mut response = remote(PacketType::SearchResponse).with_text("a.bin|abc|3\n");
        response.originator_addr = "not an address".to_string();
        f.coordinator.handle_packet(response, source()).await;
        assert_eq!(f.coordinator.peers_for_file("abc").await[0].addr, source());
    }

    #[tokio::test]
    async fn test_chunk_requests_are_served_clipped() {
        let f = fixture().await;
        for index in [0, 2, 3] {
            let request = remote(PacketType::ChunkRequest)
                .with_file(SOURCE_ID, 0)
                .with_chunk(index, None);
            f.coordinator.handle_packet(request, source()).await;
        }
        let unknown = remote(PacketType::ChunkRequest).with_file("unknown", 0).with_chunk(0, None);
        f.coordinator.handle_packet(unknown, source()).await;

        let sent = f.transport.sent.lock().await;
        assert_eq!(sent.len(), 3);
        let payloads: Vec<Option<Vec<u8>>> = sent.iter().map(|(_, p)| p.chunk_payload.clone()).collect();
        assert_eq!(payloads, vec![Some(b"hell".to_vec()), Some(b"rld".to_vec()), None]);
        assert!(sent.iter().all(|(_, p)| p.packet_type == PacketType::ChunkResponse && p.file_size == 11));
        assert_eq!(sent[1].1.chunk_index, 2);
    }

    #[tokio::test]
    async fn test_discovery_records_known_node() {
        let f = fixture().await;
        f.coordinator.handle_packet(remote(PacketType::Discovery).with_text("Hello"), source()).await;
        let nodes = f.coordinator.known_nodes().await;
        assert_eq!(nodes.get(&NodeId::new([9u8; 20]).to_hex()).map(String::as_str), Some("127.0.0.1:7000"));
    }

    #[tokio::test]
    async fn test_download_preconditions() {
        let f = fixture().await;
        // No destination yet
        assert!(f.coordinator.download_file("abc", 10, None).await.is_err());

        f.coordinator.set_destination_folder(f.root.join("dest")).await;
        // No known holder
        assert!(f.coordinator.download_file("abc", 10, None).await.is_err());
        // Empty explicit peer set
        assert!(f.coordinator.download_file("abc", 10, Some(Vec::new())).await.is_err());

        f.coordinator
            .handle_packet(remote(PacketType::SearchResponse).with_text("song.mp3|abc|10\n"), source())
            .await;
        f.coordinator.set_download_masks(DownloadMasks::parse("*.mp3")).await;
        assert!(f.coordinator.download_file("abc", 10, None).await.is_err());

        f.coordinator.set_download_masks(DownloadMasks::default()).await;
        f.coordinator.download_file("abc", 10, None).await.unwrap();
        assert!(f.coordinator.is_downloading("abc").await);
        assert!(f.coordinator.download_file("abc", 10, None).await.is_err());

        f.coordinator.abort_sessions().await;
    }

    #[tokio::test]
    async fn test_chunk_responses_feed_active_download() {
        let f = fixture().await;
        let progress = Arc::new(RecordingProgress::default());
        let coordinator = NodeCoordinator::new(
            &NodeConfig { chunk_size: 4, ..NodeConfig::default() },
            f.coordinator.outbound.clone(),
            Arc::new(Sha1Identifier),
            Arc::new(LogSink),
            progress.clone(),
        );
        coordinator.set_destination_folder(f.root.join("dest")).await;
        coordinator
            .download_file("xyz", 6, Some(vec!["127.0.0.1:7000".parse().unwrap()]))
            .await
            .unwrap();

        // Stray response for another file is dropped
        coordinator
            .handle_packet(remote(PacketType::ChunkResponse).with_file("other", 6).with_chunk(0, Some(b"zzzz".to_vec())), source())
            .await;
        for (index, data) in [(1, b"ef".to_vec()), (0, b"abcd".to_vec())] {
            let response = remote(PacketType::ChunkResponse).with_file("xyz", 6).with_chunk(index, Some(data));
            coordinator.handle_packet(response, source()).await;
        }

        assert!(!coordinator.is_downloading("xyz").await);
        let written = std::fs::read(f.root.join("dest").join("xyz_downloaded.dat")).unwrap();
        assert_eq!(written, b"abcdef");
        assert_eq!(progress.percents(), vec![50.0, 100.0]);
        coordinator.abort_sessions().await;
    }
}
