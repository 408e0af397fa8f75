//! Multi-source download session
//!
//! One request per chunk, each sent to a peer picked uniformly at random
//! from a fixed set. Requests are paced but never retried or timed out.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::ShareError;
use crate::node::ChunkRequester;
use crate::transfer::assembly::ChunkAssembly;

/// Uniform random choice from `peers`
pub fn choose_peer<R: Rng + ?Sized>(peers: &[SocketAddr], rng: &mut R) -> Option<SocketAddr> {
    peers.choose(rng).copied()
}

pub struct MultiSourceSession {
    assembly: Arc<ChunkAssembly>,
    peers: Vec<SocketAddr>,
    requester: Arc<dyn ChunkRequester>,
    pacing: std::time::Duration,
}

impl MultiSourceSession {
    pub fn new(
        assembly: Arc<ChunkAssembly>,
        peers: Vec<SocketAddr>,
        requester: Arc<dyn ChunkRequester>,
        pacing: std::time::Duration,
    ) -> Result<Self> {
        if peers.is_empty() {
            return Err(ShareError::download_error_for("No peers for multi-source download", assembly.file_id()).into());
        }
        Ok(Self {
            assembly,
            peers,
            requester,
            pacing,
        })
    }

    pub fn assembly(&self) -> &Arc<ChunkAssembly> {
        &self.assembly
    }

    /// Send one request per chunk; completion happens on arrival
    pub async fn run(self) -> Result<()> {
        let file_id = self.assembly.file_id().to_string();
        info!(
            "Multi-source download of {} from {} peers ({} chunks)",
            file_id,
            self.peers.len(),
            self.assembly.total_chunks()
        );

        for index in 0..self.assembly.total_chunks() {
            if !self.assembly.is_active().await {
                break;
            }
            let Ok(wire_index) = i32::try_from(index) else {
                warn!("Chunk {} of {} has no wire index, stopping", index, file_id);
                break;
            };
            let choice = {
                let mut rng = rand::thread_rng();
                choose_peer(&self.peers, &mut rng)
            };
            let Some(peer) = choice else {
                break;
            };
            debug!("Chunk {} of {} from {}", index, file_id, peer);
            if let Err(e) = self.requester.request_chunk(peer, &file_id, wire_index).await {
                warn!("Request for chunk {} of {} to {} failed: {}", index, file_id, peer, e);
            }
            tokio::time::sleep(self.pacing).await;
        }

        debug!("All chunk requests for {} sent", file_id);
        Ok(())
    }
}
