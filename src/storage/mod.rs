//! Storage module
//!
//! Local shared-file catalog, content identifiers, folder scanning, and
//! download masks.

pub mod catalog;
pub mod content;
pub mod filter;
pub mod scanner;

// Re-export catalog types
pub use catalog::{read_chunk, FileCatalog, FileRecord};

// Re-export content identifier types
pub use content::{ContentIdentifier, ContentInfo, Sha1Identifier};

pub use filter::DownloadMasks;
pub use scanner::scan_folder;
