//! Chunk assembly
//!
//! Per-download chunk buffers shared between the session task that requests
//! chunks and the endpoint worker that delivers them. All buffer and counter
//! access happens under one lock; the transition to finalized happens once.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::error::ShareError;
use crate::node::ProgressSink;

/// What to do when a session gives up with chunks still missing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartialDownloadPolicy {
    /// Write the chunks that did arrive and report completion
    #[default]
    Finalize,
    /// Write nothing and end the session as failed
    Discard,
}

/// Largest file a download will accept by default (4 GiB)
pub const DEFAULT_MAX_DOWNLOAD_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Download session timing and policy
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Wait after each single-source request before checking arrival
    pub retry_delay: Duration,
    /// Requests per chunk before a single-source session moves on
    pub max_attempts: u32,
    /// Gap between consecutive multi-source requests
    pub multi_source_pacing: Duration,
    pub partial_policy: PartialDownloadPolicy,
    /// Advertised sizes above this are refused before any buffer is allocated
    pub max_download_size: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(500),
            max_attempts: 3,
            multi_source_pacing: Duration::from_millis(10),
            partial_policy: PartialDownloadPolicy::Finalize,
            max_download_size: DEFAULT_MAX_DOWNLOAD_SIZE,
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ShareError::config_error_with_field("max_attempts must be at least 1", "max_attempts").into());
        }
        if self.max_download_size == 0 {
            return Err(ShareError::config_error_with_field("max_download_size must be positive", "max_download_size").into());
        }
        Ok(())
    }

    /// Check an advertised `size` before a session is created for it.
    /// Returns the chunk count, which always fits a wire chunk index.
    pub fn check_download_size(&self, file_id: &str, size: u64, chunk_size: usize) -> Result<usize> {
        if size > self.max_download_size {
            return Err(ShareError::download_error_for(
                format!("Advertised size {} exceeds the {} byte limit", size, self.max_download_size),
                file_id,
            )
            .into());
        }
        let chunks = total_chunks(size, chunk_size);
        if i32::try_from(chunks).is_err() {
            return Err(ShareError::download_error_for(
                format!("{} chunks do not fit a chunk index", chunks),
                file_id,
            )
            .into());
        }
        Ok(chunks)
    }
}

/// Number of chunks covering `size` bytes; an empty file still has one.
/// Saturates at `usize::MAX` on targets where the count does not fit.
pub fn total_chunks(size: u64, chunk_size: usize) -> usize {
    let chunk_size = chunk_size.max(1) as u64;
    usize::try_from(size.div_ceil(chunk_size)).unwrap_or(usize::MAX).max(1)
}

/// Result of delivering one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Newly stored, more chunks outstanding
    Stored,
    /// Newly stored and the file was finalized
    Completed,
    /// Index already filled
    Duplicate,
    /// Index outside `[0, total_chunks)`
    OutOfRange,
    /// Session already finalized or discarded
    Inactive,
}

#[derive(Debug)]
struct AssemblyState {
    buffers: Vec<Option<Vec<u8>>>,
    received: usize,
    active: bool,
}

/// Chunk buffers and completion state of one download
pub struct ChunkAssembly {
    file_id: String,
    output_path: PathBuf,
    total_chunks: usize,
    state: Mutex<AssemblyState>,
    progress: Arc<dyn ProgressSink>,
}

impl ChunkAssembly {
    pub fn new(
        file_id: impl Into<String>,
        file_size: u64,
        chunk_size: usize,
        destination: &Path,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let file_id = file_id.into();
        let total_chunks = total_chunks(file_size, chunk_size);
        let output_path = destination.join(format!("{}_downloaded.dat", file_id));
        debug!("Assembly for {}: {} bytes in {} chunks", file_id, file_size, total_chunks);
        Self {
            file_id,
            output_path,
            total_chunks,
            state: Mutex::new(AssemblyState {
                buffers: vec![None; total_chunks],
                received: 0,
                active: true,
            }),
            progress,
        }
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    /// Where the finished file is written
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.active
    }

    pub async fn received_count(&self) -> usize {
        self.state.lock().await.received
    }

    pub async fn has_chunk(&self, index: usize) -> bool {
        let state = self.state.lock().await;
        state.buffers.get(index).map_or(false, Option::is_some)
    }

    /// Store an arriving chunk. Finalizes the download the moment the last
    /// missing chunk lands.
    pub async fn handle_chunk(&self, index: i32, payload: Vec<u8>) -> Result<ChunkOutcome> {
        let (received, buffers) = {
            let mut state = self.state.lock().await;
            if !state.active {
                trace!("Chunk {} for inactive download {}", index, self.file_id);
                return Ok(ChunkOutcome::Inactive);
            }
            let slot = match usize::try_from(index).ok().filter(|i| *i < self.total_chunks) {
                Some(slot) => slot,
                None => {
                    debug!("Chunk index {} out of range for {} ({} chunks)", index, self.file_id, self.total_chunks);
                    return Ok(ChunkOutcome::OutOfRange);
                }
            };
            if state.buffers[slot].is_some() {
                trace!("Duplicate chunk {} for {}", index, self.file_id);
                return Ok(ChunkOutcome::Duplicate);
            }

            state.buffers[slot] = Some(payload);
            state.received += 1;
            let received = state.received;
            let buffers = if received == self.total_chunks {
                state.active = false;
                Some(std::mem::take(&mut state.buffers))
            } else {
                None
            };
            (received, buffers)
        };

        match buffers {
            Some(buffers) => {
                self.write_output(buffers).await?;
                Ok(ChunkOutcome::Completed)
            }
            None => {
                let percent = received as f64 * 100.0 / self.total_chunks as f64;
                self.progress.report_progress(&self.file_id, percent);
                Ok(ChunkOutcome::Stored)
            }
        }
    }

    /// Close a download that will receive no further requests, applying
    /// `policy` if chunks are still missing. No-op once inactive.
    pub async fn finish(&self, policy: PartialDownloadPolicy) -> Result<()> {
        let buffers = {
            let mut state = self.state.lock().await;
            if !state.active {
                return Ok(());
            }
            state.active = false;
            let missing = self.total_chunks - state.received;
            match policy {
                PartialDownloadPolicy::Finalize => {
                    warn!(
                        "Finalizing {} with {} of {} chunks missing",
                        self.file_id, missing, self.total_chunks
                    );
                    std::mem::take(&mut state.buffers)
                }
                PartialDownloadPolicy::Discard => {
                    error!(
                        "Discarding {}: {} of {} chunks never arrived",
                        self.file_id, missing, self.total_chunks
                    );
                    state.buffers.clear();
                    return Err(ShareError::download_error_for(
                        format!("{} chunks missing after retries", missing),
                        self.file_id.clone(),
                    )
                    .into());
                }
            }
        };
        self.write_output(buffers).await
    }

    /// Write filled buffers in ascending index order, skipping holes
    async fn write_output(&self, buffers: Vec<Option<Vec<u8>>>) -> Result<()> {
        let received: usize = buffers.iter().flatten().map(Vec::len).sum();
        let mut data = Vec::with_capacity(received);
        for chunk in buffers.into_iter().flatten() {
            data.extend_from_slice(&chunk);
        }

        if let Some(parent) = self.output_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                error!("Failed to create destination '{}': {}", parent.display(), e);
                ShareError::storage_error_full("Failed to create destination", parent.display().to_string(), e.to_string())
            })?;
        }
        tokio::fs::write(&self.output_path, &data).await.map_err(|e| {
            error!("Failed to write '{}': {}", self.output_path.display(), e);
            ShareError::storage_error_full("Failed to write download", self.output_path.display().to_string(), e.to_string())
        })?;

        info!("Download {} complete: {} bytes written to {}", self.file_id, data.len(), self.output_path.display());
        self.progress.report_progress(&self.file_id, 100.0);
        Ok(())
    }
}
