//! Transfer module
//!
//! Chunk-oriented download sessions and the chunk datagram endpoint.

pub mod assembly;
pub mod endpoint;
pub mod multi;
pub mod session;
pub mod single;

// Re-exports for convenience
pub use assembly::{total_chunks, ChunkAssembly, ChunkOutcome, PartialDownloadPolicy, TransferConfig};
pub use endpoint::{bind_chunk_socket, ChunkEndpoint};
pub use multi::{choose_peer, MultiSourceSession};
pub use session::DownloadSession;
pub use single::SingleSourceSession;
