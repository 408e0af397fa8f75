//! Search result records
//!
//! A SEARCH_RESPONSE text payload is a list of `name|identifier|size` lines.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One matching file advertised by a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRecord {
    /// Display name of the file
    pub name: String,
    /// Content identifier
    pub file_id: String,
    /// File size in bytes
    pub size: u64,
}

impl SearchRecord {
    pub fn new(name: impl Into<String>, file_id: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            file_id: file_id.into(),
            size,
        }
    }

    /// Render as a single `name|identifier|size` line (no newline)
    pub fn to_line(&self) -> String {
        format!("{}|{}|{}", self.name, self.file_id, self.size)
    }

    /// Parse one line. Splits from the right so names may contain `|`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            return None;
        }
        let mut parts = line.rsplitn(3, '|');
        let size = parts.next()?.trim().parse::<u64>().ok()?;
        let file_id = parts.next()?;
        let name = parts.next()?;
        if file_id.is_empty() {
            return None;
        }
        Some(Self::new(name, file_id, size))
    }
}

/// Split records into response payloads of at most `max_len` bytes each,
/// one newline-terminated line per record.
/// A record whose line alone exceeds `max_len` is left out.
pub fn batch_records(records: &[SearchRecord], max_len: usize) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();
    for record in records {
        let mut line = record.to_line();
        line.push('\n');
        if line.len() > max_len {
            warn!("Search record for {} does not fit a response, skipping", record.file_id);
            continue;
        }
        if current.len() + line.len() > max_len {
            batches.push(std::mem::take(&mut current));
        }
        current.push_str(&line);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Parse every well-formed line of a response payload; malformed lines are skipped
pub fn parse_records(text: &str) -> Vec<SearchRecord> {
    text.lines()
        .filter_map(|line| {
            let record = SearchRecord::parse_line(line);
            if record.is_none() && !line.trim().is_empty() {
                debug!("Skipping malformed search record: {:?}", line);
            }
            record
        })
        .collect()
}
