//! Outbound traffic
//!
//! Every packet this node originates goes through [`Outbound`], which stamps
//! the local identity and reply address and hands the encoded bytes to the
//! attached [`Transport`]. Sessions only see the [`ChunkRequester`] side.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tracing::{debug, error, trace, warn};

use crate::discovery::NodeId;
use crate::error::ShareError;
use crate::protocol::{Packet, PacketType, MAX_PACKET_SIZE};

/// Hop budget for unicast replies and chunk traffic
const UNICAST_TTL: i32 = 1;

/// Datagram sender
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<()>;
}

/// Transport over a shared UDP socket
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<()> {
        self.socket.send_to(data, target).await.map_err(|e| {
            ShareError::network_error_full("Failed to send datagram", target.to_string(), e.to_string())
        })?;
        Ok(())
    }
}

/// Issues chunk requests on behalf of download sessions
#[async_trait]
pub trait ChunkRequester: Send + Sync {
    async fn request_chunk(&self, peer: SocketAddr, file_id: &str, index: i32) -> Result<()>;
}

struct Link {
    transport: Arc<dyn Transport>,
    reply_addr: String,
}

/// Send handle shared by the coordinator and its sessions
pub struct Outbound {
    node_id: NodeId,
    flood_ttl: i32,
    targets: Vec<SocketAddr>,
    link: RwLock<Option<Link>>,
}

impl Outbound {
    pub fn new(node_id: NodeId, flood_ttl: i32, targets: Vec<SocketAddr>) -> Self {
        Self {
            node_id,
            flood_ttl,
            targets,
            link: RwLock::new(None),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Start sending through `transport`, advertising `reply_addr`
    pub async fn attach(&self, transport: Arc<dyn Transport>, reply_addr: String) {
        debug!("Outbound attached, reply address {}", reply_addr);
        *self.link.write().await = Some(Link { transport, reply_addr });
    }

    pub async fn detach(&self) {
        *self.link.write().await = None;
    }

    pub async fn reply_addr(&self) -> Option<String> {
        self.link.read().await.as_ref().map(|link| link.reply_addr.clone())
    }

    /// Build a packet carrying local identity and reply address
    pub async fn packet(&self, packet_type: PacketType, ttl: i32) -> Result<Packet> {
        let reply_addr = self.reply_addr().await.ok_or_else(|| {
            ShareError::network_error("Node is not connected")
        })?;
        Ok(Packet::new(packet_type, ttl, reply_addr).with_node_id(self.node_id.to_hex()))
    }

    /// Bytes of text payload a reply can carry with no file or chunk fields
    pub async fn reply_text_budget(&self) -> Result<usize> {
        let template = Packet {
            originator_addr: self.reply_addr().await.ok_or_else(|| ShareError::network_error("Node is not connected"))?,
            node_id: self.node_id.to_hex(),
            ..Packet::default()
        };
        Ok(MAX_PACKET_SIZE.saturating_sub(template.encoded_len()))
    }

    /// Unicast `packet` to `target`
    pub async fn send(&self, packet: &Packet, target: SocketAddr) -> Result<()> {
        let data = packet.encode()?;
        let transport = self.transport().await?;
        transport.send_to(&data, target).await.map_err(|e| {
            warn!("Failed to send {} to {}: {}", packet.packet_type, target, e);
            e
        })?;
        trace!("Sent {} seq={} to {}", packet.packet_type, packet.sequence, target);
        Ok(())
    }

    /// Send `packet` to every broadcast target; succeeds if any send does
    pub async fn broadcast(&self, packet: &Packet) -> Result<()> {
        let data = packet.encode()?;
        let transport = self.transport().await?;
        let mut delivered = 0usize;
        for target in &self.targets {
            match transport.send_to(&data, *target).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Failed to send {} to {}: {}", packet.packet_type, target, e),
            }
        }
        if delivered == 0 && !self.targets.is_empty() {
            error!("{} seq={} reached no broadcast target", packet.packet_type, packet.sequence);
            return Err(ShareError::network_error("Broadcast failed on every target").into());
        }
        debug!("Broadcast {} seq={} to {} targets", packet.packet_type, packet.sequence, delivered);
        Ok(())
    }

    /// Flood a search query for `query`
    pub async fn search(&self, query: &str) -> Result<()> {
        let packet = self.packet(PacketType::Search, self.flood_ttl).await?.with_text(query);
        self.broadcast(&packet).await
    }

    /// Reply with a unicast packet of `packet_type`
    pub async fn reply(&self, packet_type: PacketType, target: SocketAddr, build: impl FnOnce(Packet) -> Packet) -> Result<()> {
        let packet = build(self.packet(packet_type, UNICAST_TTL).await?);
        self.send(&packet, target).await
    }

    async fn transport(&self) -> Result<Arc<dyn Transport>> {
        self.link
            .read()
            .await
            .as_ref()
            .map(|link| link.transport.clone())
            .ok_or_else(|| ShareError::network_error("Node is not connected").into())
    }
}

#[async_trait]
impl ChunkRequester for Outbound {
    async fn request_chunk(&self, peer: SocketAddr, file_id: &str, index: i32) -> Result<()> {
        self.reply(PacketType::ChunkRequest, peer, |p| p.with_file(file_id, 0).with_chunk(index, None))
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::sync::Mutex;

    /// Transport that records every datagram instead of sending it
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub sent: Mutex<Vec<(SocketAddr, Packet)>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<()> {
            self.sent.lock().await.push((target, Packet::decode(data)?));
            Ok(())
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_send_requires_attachment() {
        let outbound = Outbound::new(NodeId::new([3u8; 20]), 2, vec![addr(9)]);
        assert!(outbound.search("x").await.is_err());
        assert!(outbound.request_chunk(addr(10), "abc", 0).await.is_err());
    }

    #[tokio::test]
    async fn test_search_and_chunk_request_are_stamped() {
        let transport = Arc::new(RecordingTransport::default());
        let outbound = Outbound::new(NodeId::new([3u8; 20]), 2, vec![addr(9), addr(19)]);
        outbound.attach(transport.clone(), "127.0.0.1:4000".to_string()).await;

        outbound.search("report").await.unwrap();
        outbound.request_chunk(addr(10), "abc", 7).await.unwrap();

        let sent = transport.sent.lock().await;
        assert_eq!(sent.len(), 3);
        let (target, search) = &sent[0];
        assert_eq!(*target, addr(9));
        assert_eq!(search.packet_type, PacketType::Search);
        assert_eq!(search.ttl, 2);
        assert_eq!(search.text, "report");
        assert_eq!(search.originator_addr, "127.0.0.1:4000");
        assert_eq!(search.node_id, NodeId::new([3u8; 20]).to_hex());
        assert_eq!(sent[1].0, addr(19));

        let (target, request) = &sent[2];
        assert_eq!(*target, addr(10));
        assert_eq!(request.packet_type, PacketType::ChunkRequest);
        assert_eq!(request.file_id, "abc");
        assert_eq!(request.chunk_index, 7);
        assert!(request.chunk_payload.is_none());
    }

    #[tokio::test]
    async fn test_reply_text_budget_fills_a_datagram() {
        let transport = Arc::new(RecordingTransport::default());
        let outbound = Outbound::new(NodeId::new([3u8; 20]), 2, vec![addr(9)]);
        assert!(outbound.reply_text_budget().await.is_err());
        outbound.attach(transport.clone(), "127.0.0.1:4000".to_string()).await;

        let budget = outbound.reply_text_budget().await.unwrap();
        let text = "x".repeat(budget);
        outbound.reply(PacketType::SearchResponse, addr(10), |p| p.with_text(text)).await.unwrap();
        let over = "x".repeat(budget + 1);
        assert!(outbound.reply(PacketType::SearchResponse, addr(10), |p| p.with_text(over)).await.is_err());
        assert_eq!(transport.sent.lock().await.len(), 1);
    }
}
