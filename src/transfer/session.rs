//! Download session variants

use std::sync::Arc;

use anyhow::Result;

use crate::transfer::assembly::ChunkAssembly;
use crate::transfer::multi::MultiSourceSession;
use crate::transfer::single::SingleSourceSession;

/// A download in either sourcing mode
pub enum DownloadSession {
    Single(SingleSourceSession),
    Multi(MultiSourceSession),
}

impl DownloadSession {
    pub fn assembly(&self) -> &Arc<ChunkAssembly> {
        match self {
            DownloadSession::Single(session) => session.assembly(),
            DownloadSession::Multi(session) => session.assembly(),
        }
    }

    pub fn is_multi_source(&self) -> bool {
        matches!(self, DownloadSession::Multi(_))
    }

    pub async fn run(self) -> Result<()> {
        match self {
            DownloadSession::Single(session) => session.run().await,
            DownloadSession::Multi(session) => session.run().await,
        }
    }
}
