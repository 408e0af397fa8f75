//! Folder scanning
//!
//! Recursive enumeration of shareable files under a root, skipping excluded
//! subfolders. No ordering guarantee.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, warn};

use crate::error::ShareError;

/// List every non-directory file under `root` that is not inside an excluded folder
pub fn scan_folder(root: &Path, excluded: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(ShareError::storage_error_with_path("Root folder is not a directory", root.display().to_string()).into());
    }

    let excluded: Vec<PathBuf> = excluded.iter().map(|p| absolute(p)).collect();
    let mut files = Vec::new();
    let mut pending = vec![absolute(root)];

    while let Some(dir) = pending.pop() {
        if is_excluded(&dir, &excluded) {
            debug!("Skipping excluded folder {}", dir.display());
            continue;
        }
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to list {}: {}", dir.display(), e);
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }

    Ok(files)
}

fn is_excluded(dir: &Path, excluded: &[PathBuf]) -> bool {
    excluded.iter().any(|ex| dir.starts_with(ex))
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
