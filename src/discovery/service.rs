//! Discovery service
//!
//! Owns the discovery datagram endpoint. One worker alternates a bounded
//! receive with the periodic presence announcement, deduplicates inbound
//! traffic, escalates fresh packets to the coordinator, and relays
//! DISCOVERY/SEARCH packets with a decremented hop budget.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::discovery::flood::{Admission, FloodFilter};
use crate::discovery::node::NodeId;
use crate::discovery::seen::SeenCache;
use crate::error::ShareError;
use crate::node::PacketHandler;
use crate::protocol::{Packet, PacketType, MAX_PACKET_SIZE};

/// Settings for one discovery endpoint
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub bind_addr: SocketAddr,
    pub targets: Vec<SocketAddr>,
    pub ttl: i32,
    pub announce_interval: Duration,
    pub receive_timeout: Duration,
    pub seen_cache_capacity: Option<usize>,
}

/// Running discovery endpoint
pub struct DiscoveryService {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

impl DiscoveryService {
    /// Bind the endpoint and start the worker
    pub async fn start(
        config: DiscoveryConfig,
        node_id: NodeId,
        reply_addr: String,
        handler: Arc<dyn PacketHandler>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind_addr).await.map_err(|e| {
            error!("Failed to bind discovery socket to {}: {}", config.bind_addr, e);
            ShareError::network_error_full("Failed to bind discovery socket", config.bind_addr.to_string(), e.to_string())
        })?;
        socket.set_broadcast(true).map_err(|e| {
            error!("Failed to enable broadcast on discovery socket: {}", e);
            ShareError::network_error_full("Failed to enable broadcast", config.bind_addr.to_string(), e.to_string())
        })?;
        let local_addr = socket.local_addr()?;
        info!("Discovery service listening on {}", local_addr);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = DiscoveryWorker {
            socket,
            filter: FloodFilter::new(node_id, SeenCache::with_capacity(config.seen_cache_capacity)),
            handler,
            node_id,
            reply_addr,
            config,
        };
        let worker = tokio::spawn(worker.run(shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown,
            worker,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }

    /// Signal the worker, wait for it to exit, and release the endpoint
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.worker.await {
            warn!("Discovery worker ended abnormally: {}", e);
        }
        info!("Discovery service stopped");
    }
}

struct DiscoveryWorker {
    socket: UdpSocket,
    filter: FloodFilter,
    handler: Arc<dyn PacketHandler>,
    node_id: NodeId,
    reply_addr: String,
    config: DiscoveryConfig,
}

impl DiscoveryWorker {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut buffer = vec![0u8; MAX_PACKET_SIZE];
        let mut last_announce: Option<Instant> = None;

        loop {
            if last_announce.map_or(true, |at| at.elapsed() >= self.config.announce_interval) {
                self.announce().await;
                last_announce = Some(Instant::now());
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("Discovery worker received shutdown ({} messages seen)", self.filter.seen_count());
                    break;
                }
                result = timeout(self.config.receive_timeout, self.socket.recv_from(&mut buffer)) => {
                    match result {
                        Err(_) => trace!("Discovery receive timed out"),
                        Ok(Ok((len, from))) => self.process_datagram(&buffer[..len], from).await,
                        Ok(Err(e)) => {
                            error!("Discovery receive failed, stopping: {}", e);
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn process_datagram(&mut self, data: &[u8], from: SocketAddr) {
        let packet = match Packet::decode(data) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Dropping undecodable datagram from {}: {}", from, e);
                return;
            }
        };

        match self.filter.admit(&packet) {
            Admission::Duplicate | Admission::Expired | Admission::SelfOriginated => {}
            Admission::Escalate { forward } => {
                trace!("Escalating {} seq={} from {}", packet.packet_type, packet.sequence, from);
                self.handler.handle_packet(packet, from).await;
                if let Some(relayed) = forward {
                    self.broadcast(&relayed).await;
                    debug!("Forwarded {} seq={} ttl={}", relayed.packet_type, relayed.sequence, relayed.ttl);
                }
            }
        }
    }

    async fn announce(&mut self) {
        let hello = Packet::new(PacketType::Discovery, self.config.ttl, self.reply_addr.clone())
            .with_text(format!("Hello from {}", self.reply_addr))
            .with_node_id(self.node_id.to_hex());
        self.filter.mark_sent(&hello);
        self.broadcast(&hello).await;
        debug!("Sent HELLO seq={}", hello.sequence);
    }

    async fn broadcast(&self, packet: &Packet) {
        let data = match packet.encode() {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to encode {}: {}", packet.packet_type, e);
                return;
            }
        };
        for target in &self.config.targets {
            if let Err(e) = self.socket.send_to(&data, target).await {
                warn!("Failed to send {} to {}: {}", packet.packet_type, target, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        packets: Mutex<Vec<Packet>>,
    }

    #[async_trait]
    impl PacketHandler for RecordingHandler {
        async fn handle_packet(&self, packet: Packet, _from: SocketAddr) {
            self.packets.lock().await.push(packet);
        }
    }

    async fn recv_packet(socket: &UdpSocket) -> Option<Packet> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await.ok()?.ok()?;
        Packet::decode(&buf[..len]).ok()
    }

    async fn recv_non_discovery(socket: &UdpSocket) -> Option<Packet> {
        for _ in 0..10 {
            let packet = recv_packet(socket).await?;
            if packet.packet_type != PacketType::Discovery {
                return Some(packet);
            }
        }
        None
    }

    async fn start_service(target: SocketAddr, handler: Arc<RecordingHandler>) -> DiscoveryService {
        let config = DiscoveryConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            targets: vec![target],
            ttl: 2,
            announce_interval: Duration::from_secs(60),
            receive_timeout: Duration::from_millis(50),
            seen_cache_capacity: None,
        };
        DiscoveryService::start(config, NodeId::new([1u8; 20]), "127.0.0.1:1".to_string(), handler)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_announces_on_start() {
        let neighbour = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let handler = Arc::new(RecordingHandler::default());
        let service = start_service(neighbour.local_addr().unwrap(), handler).await;

        let hello = recv_packet(&neighbour).await.expect("announcement");
        assert_eq!(hello.packet_type, PacketType::Discovery);
        assert_eq!(hello.ttl, 2);
        assert_eq!(hello.node_id, NodeId::new([1u8; 20]).to_hex());
        assert!(hello.text.starts_with("Hello from"));

        service.stop().await;
    }

    #[tokio::test]
    async fn test_escalates_once_and_forwards() {
        let neighbour = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let handler = Arc::new(RecordingHandler::default());
        let service = start_service(neighbour.local_addr().unwrap(), handler.clone()).await;

        let search = Packet::new(PacketType::Search, 2, "127.0.0.1:9")
            .with_node_id(NodeId::new([7u8; 20]).to_hex())
            .with_text("report");
        let data = search.encode().unwrap();
        neighbour.send_to(&data, service.local_addr()).await.unwrap();
        neighbour.send_to(&data, service.local_addr()).await.unwrap();

        let relayed = recv_non_discovery(&neighbour).await.expect("relayed search");
        assert_eq!(relayed.sequence, search.sequence);
        assert_eq!(relayed.ttl, 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.packets.lock().await.len(), 1);

        service.stop().await;
    }

    #[tokio::test]
    async fn test_ignores_expired_and_own_packets() {
        let neighbour = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let handler = Arc::new(RecordingHandler::default());
        let service = start_service(neighbour.local_addr().unwrap(), handler.clone()).await;

        let expired = Packet::new(PacketType::Search, 0, "").with_node_id(NodeId::new([7u8; 20]).to_hex());
        let own = Packet::new(PacketType::Search, 2, "").with_node_id(NodeId::new([1u8; 20]).to_hex());
        neighbour.send_to(&expired.encode().unwrap(), service.local_addr()).await.unwrap();
        neighbour.send_to(&own.encode().unwrap(), service.local_addr()).await.unwrap();
        neighbour.send_to(b"junk", service.local_addr()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(handler.packets.lock().await.is_empty());
        assert!(service.is_running());

        service.stop().await;
    }
}
