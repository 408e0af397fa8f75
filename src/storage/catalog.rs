//! Shared-file catalog
//!
//! Built once per scan of the root folder and immutable until the next scan.
//! Answers name searches and serves fixed-size chunk windows from disk.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, error, info, warn};

use crate::error::ShareError;
use crate::protocol::SearchRecord;
use crate::storage::content::ContentIdentifier;
use crate::storage::scanner::scan_folder;

/// A shared local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Content digest
    pub file_id: String,
    /// Size in bytes at scan time
    pub size: u64,
    /// Display name (final path component)
    pub name: String,
    /// Backing file on disk
    pub path: PathBuf,
}

impl FileRecord {
    pub fn search_record(&self) -> SearchRecord {
        SearchRecord::new(self.name.clone(), self.file_id.clone(), self.size)
    }
}

/// Identifier-keyed set of shared files
#[derive(Debug, Clone, Default)]
pub struct FileCatalog {
    files: HashMap<String, FileRecord>,
}

impl FileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `root` (skipping `excluded`) and identify every file found.
    /// Files that cannot be identified, or whose name contains a line break,
    /// are left out.
    pub fn build(root: &Path, excluded: &[PathBuf], identifier: &dyn ContentIdentifier) -> Result<Self> {
        let mut catalog = Self::new();
        for path in scan_folder(root, excluded)? {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            // Search responses are newline-delimited
            if name.contains(['\n', '\r']) {
                warn!("Skipping {:?}: name contains a line break", path);
                continue;
            }
            match identifier.identify(&path) {
                Ok(info) => {
                    debug!("Shared {} [id={}, size={}]", path.display(), info.file_id, info.size);
                    catalog.insert(FileRecord {
                        file_id: info.file_id,
                        size: info.size,
                        name,
                        path,
                    });
                }
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }
        info!("Catalog built from {}: {} files", root.display(), catalog.len());
        Ok(catalog)
    }

    /// `build` on the blocking pool
    pub async fn scan(root: PathBuf, excluded: Vec<PathBuf>, identifier: Arc<dyn ContentIdentifier>) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::build(&root, &excluded, identifier.as_ref()))
            .await
            .map_err(|e| ShareError::storage_error_full("Catalog scan task failed", "unknown".to_string(), e.to_string()))?
    }

    pub fn insert(&mut self, record: FileRecord) {
        self.files.insert(record.file_id.clone(), record);
    }

    pub fn get(&self, file_id: &str) -> Option<&FileRecord> {
        self.files.get(file_id)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    /// Files whose display name contains `query`, case-insensitively, ordered by name
    pub fn search(&self, query: &str) -> Vec<SearchRecord> {
        let query = query.to_lowercase();
        let mut matches: Vec<SearchRecord> = self
            .files
            .values()
            .filter(|record| record.name.to_lowercase().contains(&query))
            .map(FileRecord::search_record)
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.file_id.cmp(&b.file_id)));
        matches
    }
}

/// Read chunk `index` of `path`: the window `[index * chunk_size, +chunk_size)`
/// clipped to end-of-file. Past the end (or a negative index) yields no bytes.
pub async fn read_chunk(path: &Path, index: i32, chunk_size: usize) -> Result<Vec<u8>> {
    if index < 0 {
        return Ok(Vec::new());
    }

    let mut file = fs::File::open(path).await.map_err(|e| {
        error!("Failed to open '{}': {}", path.display(), e);
        ShareError::storage_error_full("Failed to open shared file", path.display().to_string(), e.to_string())
    })?;
    let length = file.metadata().await?.len();

    let offset = index as u64 * chunk_size as u64;
    if offset >= length {
        return Ok(Vec::new());
    }
    let to_read = (chunk_size as u64).min(length - offset) as usize;

    file.seek(SeekFrom::Start(offset)).await.map_err(|e| {
        error!("Failed to seek '{}' to {}: {}", path.display(), offset, e);
        ShareError::storage_error_full("Failed to seek shared file", path.display().to_string(), e.to_string())
    })?;
    let mut buffer = vec![0u8; to_read];
    file.read_exact(&mut buffer).await.map_err(|e| {
        error!("Failed to read chunk {} of '{}': {}", index, path.display(), e);
        ShareError::storage_error_full("Failed to read chunk", path.display().to_string(), e.to_string())
    })?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::content::Sha1Identifier;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("peershare_{}_{}", tag, rand::random::<u32>()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_build_and_search() {
        let dir = temp_dir("catalog");
        std::fs::write(dir.join("Holiday Photos.zip"), b"zip bytes").unwrap();
        std::fs::write(dir.join("report.pdf"), b"pdf bytes").unwrap();

        let catalog = FileCatalog::build(&dir, &[], &Sha1Identifier).unwrap();
        assert_eq!(catalog.len(), 2);

        let hits = catalog.search("PHOTO");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Holiday Photos.zip");
        assert_eq!(hits[0].size, 9);
        assert!(catalog.get(&hits[0].file_id).is_some());

        assert!(catalog.search("missing").is_empty());
        assert_eq!(catalog.search("").len(), 2);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_build_skips_names_with_line_breaks() {
        let dir = temp_dir("catalog_newline");
        std::fs::write(dir.join("notes\nfake.bin|ffff|1.txt"), b"notes").unwrap();
        std::fs::write(dir.join("notes.txt"), b"notes too").unwrap();

        let catalog = FileCatalog::build(&dir, &[], &Sha1Identifier).unwrap();
        assert_eq!(catalog.len(), 1);
        let hits = catalog.search("notes");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "notes.txt");

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_read_chunk_windows() {
        let dir = temp_dir("chunks");
        let path = dir.join("ten.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        assert_eq!(read_chunk(&path, 0, 4).await.unwrap(), b"0123");
        assert_eq!(read_chunk(&path, 1, 4).await.unwrap(), b"4567");
        assert_eq!(read_chunk(&path, 2, 4).await.unwrap(), b"89");
        assert!(read_chunk(&path, 3, 4).await.unwrap().is_empty());
        assert!(read_chunk(&path, 100, 4).await.unwrap().is_empty());
        assert!(read_chunk(&path, -1, 4).await.unwrap().is_empty());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_read_chunk_lengths() {
        let dir = temp_dir("chunk_lengths");
        let path = dir.join("data.bin");
        let size = 1000usize;
        std::fs::write(&path, vec![7u8; size]).unwrap();

        for chunk_size in [1usize, 3, 64, 999, 1000, 4096] {
            for index in 0..(size / chunk_size + 2) {
                let chunk = read_chunk(&path, index as i32, chunk_size).await.unwrap();
                let start = index * chunk_size;
                let expected = if start < size { chunk_size.min(size - start) } else { 0 };
                assert_eq!(chunk.len(), expected, "chunk_size={} index={}", chunk_size, index);
            }
        }

        let _ = std::fs::remove_dir_all(dir);
    }
}
