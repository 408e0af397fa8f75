//! Single-source download session
//!
//! Requests chunks from one peer in ascending order. Each chunk gets a
//! bounded retry loop: send, wait a fixed delay, check arrival. A chunk that
//! never arrives is skipped, and the configured partial policy decides what
//! happens to the file once every index has been tried.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::node::ChunkRequester;
use crate::transfer::assembly::{ChunkAssembly, TransferConfig};

pub struct SingleSourceSession {
    assembly: Arc<ChunkAssembly>,
    peer: SocketAddr,
    requester: Arc<dyn ChunkRequester>,
    config: TransferConfig,
}

impl SingleSourceSession {
    pub fn new(
        assembly: Arc<ChunkAssembly>,
        peer: SocketAddr,
        requester: Arc<dyn ChunkRequester>,
        config: TransferConfig,
    ) -> Self {
        Self {
            assembly,
            peer,
            requester,
            config,
        }
    }

    pub fn assembly(&self) -> &Arc<ChunkAssembly> {
        &self.assembly
    }

    /// Drive the download to completion
    pub async fn run(self) -> Result<()> {
        let file_id = self.assembly.file_id().to_string();
        info!(
            "Single-source download of {} from {} ({} chunks)",
            file_id,
            self.peer,
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
            if !self.fetch_chunk(&file_id, index, wire_index).await {
                warn!(
                    "Chunk {} of {} not received after {} attempts, moving on",
                    index, file_id, self.config.max_attempts
                );
            }
        }

        self.assembly.finish(self.config.partial_policy).await
    }

    /// Request `index` until it arrives or attempts run out
    async fn fetch_chunk(&self, file_id: &str, index: usize, wire_index: i32) -> bool {
        for attempt in 1..=self.config.max_attempts {
            if self.assembly.has_chunk(index).await {
                return true;
            }
            if let Err(e) = self.requester.request_chunk(self.peer, file_id, wire_index).await {
                warn!("Request for chunk {} of {} failed: {}", index, file_id, e);
            }
            tokio::time::sleep(self.config.retry_delay).await;
            if self.assembly.has_chunk(index).await || !self.assembly.is_active().await {
                return true;
            }
            debug!("Chunk {} of {} missing after attempt {}", index, file_id, attempt);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::assembly::tests::{temp_dest, RecordingProgress};
    use crate::transfer::PartialDownloadPolicy;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Serves chunks of `data` straight into the assembly, dropping the
    /// first request for every index in `flaky`
    struct LoopbackPeer {
        data: Vec<u8>,
        chunk_size: usize,
        assembly: Mutex<Option<Arc<ChunkAssembly>>>,
        flaky: Mutex<HashSet<i32>>,
        dead: HashSet<i32>,
        requests: Mutex<Vec<i32>>,
    }

    impl LoopbackPeer {
        fn new(data: &[u8], chunk_size: usize, flaky: &[i32], dead: &[i32]) -> Self {
            Self {
                data: data.to_vec(),
                chunk_size,
                assembly: Mutex::new(None),
                flaky: Mutex::new(flaky.iter().copied().collect()),
                dead: dead.iter().copied().collect(),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChunkRequester for LoopbackPeer {
        async fn request_chunk(&self, _peer: SocketAddr, _file_id: &str, index: i32) -> Result<()> {
            self.requests.lock().await.push(index);
            if self.dead.contains(&index) || self.flaky.lock().await.remove(&index) {
                return Ok(());
            }
            let start = index as usize * self.chunk_size;
            let end = (start + self.chunk_size).min(self.data.len());
            let chunk = self.data[start..end].to_vec();
            if let Some(assembly) = self.assembly.lock().await.clone() {
                assembly.handle_chunk(index, chunk).await?;
            }
            Ok(())
        }
    }

    fn fast_config(policy: PartialDownloadPolicy) -> TransferConfig {
        TransferConfig {
            retry_delay: Duration::from_millis(5),
            max_attempts: 3,
            multi_source_pacing: Duration::from_millis(1),
            partial_policy: policy,
            ..TransferConfig::default()
        }
    }

    fn peer_addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_downloads_in_order_with_retry() {
        let dest = temp_dest("single");
        let progress = Arc::new(RecordingProgress::default());
        let assembly = Arc::new(ChunkAssembly::new("s1", 10, 4, &dest, progress.clone()));
        let peer = Arc::new(LoopbackPeer::new(b"0123456789", 4, &[1], &[]));
        *peer.assembly.lock().await = Some(assembly.clone());

        let session = SingleSourceSession::new(
            assembly.clone(),
            peer_addr(),
            peer.clone(),
            fast_config(PartialDownloadPolicy::Finalize),
        );
        session.run().await.unwrap();

        assert_eq!(*peer.requests.lock().await, vec![0, 1, 1, 2]);
        assert_eq!(std::fs::read(assembly.output_path()).unwrap(), b"0123456789");
        let percents = progress.percents();
        assert_eq!(percents.len(), 3);
        assert!((percents[0] - 33.33).abs() < 0.1);
        assert!((percents[1] - 66.67).abs() < 0.1);
        assert_eq!(percents[2], 100.0);

        let _ = std::fs::remove_dir_all(dest);
    }

    #[tokio::test]
    async fn test_missing_chunk_finalizes_partial_file() {
        let dest = temp_dest("single_partial");
        let progress = Arc::new(RecordingProgress::default());
        let assembly = Arc::new(ChunkAssembly::new("s2", 10, 4, &dest, progress.clone()));
        let peer = Arc::new(LoopbackPeer::new(b"0123456789", 4, &[], &[1]));
        *peer.assembly.lock().await = Some(assembly.clone());

        let session = SingleSourceSession::new(
            assembly.clone(),
            peer_addr(),
            peer.clone(),
            fast_config(PartialDownloadPolicy::Finalize),
        );
        session.run().await.unwrap();

        assert_eq!(*peer.requests.lock().await, vec![0, 1, 1, 1, 2]);
        assert_eq!(std::fs::read(assembly.output_path()).unwrap(), b"012389");
        assert_eq!(*progress.percents().last().unwrap(), 100.0);

        let _ = std::fs::remove_dir_all(dest);
    }

    #[tokio::test]
    async fn test_missing_chunk_discarded_by_policy() {
        let dest = temp_dest("single_discard");
        let assembly = Arc::new(ChunkAssembly::new("s3", 10, 4, &dest, Arc::new(RecordingProgress::default())));
        let peer = Arc::new(LoopbackPeer::new(b"0123456789", 4, &[], &[2]));
        *peer.assembly.lock().await = Some(assembly.clone());

        let session = SingleSourceSession::new(
            assembly.clone(),
            peer_addr(),
            peer,
            fast_config(PartialDownloadPolicy::Discard),
        );
        assert!(session.run().await.is_err());
        assert!(!assembly.output_path().exists());
        assert!(!assembly.is_active().await);
    }
}
