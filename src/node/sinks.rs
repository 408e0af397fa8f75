//! Outbound notification sinks
//!
//! The core reports search results and download progress through these two
//! narrow interfaces. Both may be invoked concurrently from endpoint workers
//! and session tasks.

use tracing::info;

/// Receives raw newline-delimited `name|identifier|size` text from search responses
pub trait ResultsSink: Send + Sync {
    fn report_results(&self, text: &str);
}

/// Receives download progress as a percentage in `[0, 100]`
pub trait ProgressSink: Send + Sync {
    fn report_progress(&self, file_id: &str, percent: f64);
}

/// Sink that writes everything to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ResultsSink for LogSink {
    fn report_results(&self, text: &str) {
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            info!("Search result: {}", line);
        }
    }
}

impl ProgressSink for LogSink {
    fn report_progress(&self, file_id: &str, percent: f64) {
        info!("Download {}: {:.1}%", file_id, percent);
    }
}
