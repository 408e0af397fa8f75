//! Chunk transfer endpoint
//!
//! Receives chunk requests, chunk responses and search responses on the
//! chunk port and hands every decoded packet to the coordinator. The same
//! socket is used for this node's outbound traffic.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::ShareError;
use crate::node::PacketHandler;
use crate::protocol::{Packet, MAX_PACKET_SIZE};

/// Bind the chunk socket with broadcast enabled
pub async fn bind_chunk_socket(addr: SocketAddr) -> Result<Arc<UdpSocket>> {
    let socket = UdpSocket::bind(addr).await.map_err(|e| {
        error!("Failed to bind chunk socket to {}: {}", addr, e);
        ShareError::network_error_full("Failed to bind chunk socket", addr.to_string(), e.to_string())
    })?;
    socket.set_broadcast(true).map_err(|e| {
        error!("Failed to enable broadcast on chunk socket: {}", e);
        ShareError::network_error_full("Failed to enable broadcast", addr.to_string(), e.to_string())
    })?;
    Ok(Arc::new(socket))
}

/// Running chunk endpoint
pub struct ChunkEndpoint {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

impl ChunkEndpoint {
    pub fn start(socket: Arc<UdpSocket>, handler: Arc<dyn PacketHandler>) -> Result<Self> {
        let local_addr = socket.local_addr()?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(receive_loop(socket, handler, shutdown_rx));
        info!("Chunk endpoint listening on {}", local_addr);
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

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.worker.await {
            warn!("Chunk endpoint worker ended abnormally: {}", e);
        }
        info!("Chunk endpoint stopped");
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, handler: Arc<dyn PacketHandler>, mut shutdown: watch::Receiver<bool>) {
    let mut buffer = vec![0u8; MAX_PACKET_SIZE];
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("Chunk endpoint received shutdown");
                break;
            }
            result = socket.recv_from(&mut buffer) => {
                let (len, from) = match result {
                    Ok(received) => received,
                    Err(e) => {
                        error!("Chunk endpoint receive failed, stopping: {}", e);
                        break;
                    }
                };
                match Packet::decode(&buffer[..len]) {
                    Ok(packet) => {
                        trace!("Chunk endpoint got {} seq={} from {}", packet.packet_type, packet.sequence, from);
                        handler.handle_packet(packet, from).await;
                    }
                    Err(e) => debug!("Dropping undecodable datagram from {}: {}", from, e),
                }
            }
        }
    }
}
