//! Content identifiers
//!
//! A file's identifier is a digest over its bytes, so the same content yields
//! the same identifier on every node.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Result;
use sha1::{Digest, Sha1};
use tracing::{error, trace};

use crate::error::ShareError;

/// Identifier and size of a local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentInfo {
    pub file_id: String,
    pub size: u64,
}

/// Computes a stable identifier for a local file
pub trait ContentIdentifier: Send + Sync {
    /// Read the file exactly once and return its identifier and size
    fn identify(&self, path: &Path) -> Result<ContentInfo>;
}

/// SHA-1 over the file bytes, rendered as lowercase hex
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha1Identifier;

impl ContentIdentifier for Sha1Identifier {
    fn identify(&self, path: &Path) -> Result<ContentInfo> {
        let mut file = File::open(path).map_err(|e| {
            error!("Failed to open '{}' for hashing: {}", path.display(), e);
            ShareError::storage_error_full("Failed to open file", path.display().to_string(), e.to_string())
        })?;

        let mut hasher = Sha1::new();
        let mut buffer = [0u8; 8192];
        let mut size = 0u64;
        loop {
            let read = file.read(&mut buffer).map_err(|e| {
                error!("Failed to read '{}' for hashing: {}", path.display(), e);
                ShareError::storage_error_full("Failed to read file", path.display().to_string(), e.to_string())
            })?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            size += read as u64;
        }

        let file_id = hex::encode(hasher.finalize());
        trace!("Identified {} as {} ({} bytes)", path.display(), file_id, size);
        Ok(ContentInfo { file_id, size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_identifier() {
        let dir = std::env::temp_dir().join(format!("peershare_content_{}", rand::random::<u32>()));
        std::fs::create_dir_all(&dir).unwrap();
        let a = dir.join("a.txt");
        let b = dir.join("b.txt");
        std::fs::write(&a, b"hello world").unwrap();
        std::fs::write(&b, b"hello world").unwrap();

        let info = Sha1Identifier.identify(&a).unwrap();
        assert_eq!(info.size, 11);
        assert_eq!(info.file_id, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
        assert_eq!(Sha1Identifier.identify(&b).unwrap(), info);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_missing_file() {
        let missing = std::env::temp_dir().join("peershare_definitely_missing.bin");
        assert!(Sha1Identifier.identify(&missing).is_err());
    }
}
