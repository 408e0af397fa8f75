//! Progress display module
//!
//! Terminal rendering of search results and download progress. Implements
//! both notification sinks so a node can report straight to the console.

use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::node::{ProgressSink, ResultsSink};
use crate::protocol::{parse_records, SearchRecord};

/// Format bytes to human readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration to human readable string
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Progress bar of `width` cells for `percent`
pub fn render_bar(percent: f64, width: usize) -> String {
    let percent = percent.clamp(0.0, 100.0);
    let filled = (percent / 100.0 * width as f64) as usize;
    let empty = width.saturating_sub(filled);
    "=".repeat(filled) + &" ".repeat(empty)
}

/// One search result as a table row or a JSON line
pub fn format_result(record: &SearchRecord, json: bool) -> String {
    if json {
        match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize search result: {}", e);
                String::new()
            }
        }
    } else {
        format!("{:<40} {:>12}  {}", record.name, format_bytes(record.size), record.file_id)
    }
}

struct DisplayState {
    last_update: Option<Instant>,
    /// `(file_id, name)` pairs already printed
    printed: HashSet<(String, String)>,
}

/// Progress display for CLI
pub struct ProgressDisplay {
    /// Start time of the run
    start_time: Instant,
    /// Minimum gap between progress redraws
    update_interval: Duration,
    /// Quiet mode (no progress output)
    quiet: bool,
    /// JSON-lines search results
    json: bool,
    state: Mutex<DisplayState>,
}

impl ProgressDisplay {
    /// Create a new progress display
    pub fn new(quiet: bool, json: bool) -> Self {
        Self::with_interval(quiet, json, Duration::from_millis(200))
    }

    /// Create a progress display with custom update interval
    pub fn with_interval(quiet: bool, json: bool, interval: Duration) -> Self {
        Self {
            start_time: Instant::now(),
            update_interval: interval,
            quiet,
            json,
            state: Mutex::new(DisplayState {
                last_update: None,
                printed: HashSet::new(),
            }),
        }
    }

    /// Records not printed yet, remembering them as printed
    fn fresh_records(&self, text: &str) -> Vec<SearchRecord> {
        let Ok(mut state) = self.state.lock() else {
            return Vec::new();
        };
        parse_records(text)
            .into_iter()
            .filter(|r| state.printed.insert((r.file_id.clone(), r.name.clone())))
            .collect()
    }

    /// Whether a progress line for `percent` should be drawn now
    fn should_draw(&self, percent: f64) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let due = state.last_update.map_or(true, |at| at.elapsed() >= self.update_interval);
        if due || percent >= 100.0 {
            state.last_update = Some(Instant::now());
            true
        } else {
            false
        }
    }

    /// Print a status message
    pub fn print_status(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }

        println!("\r\x1b[2K{}", message);
        Ok(())
    }

    /// Print an error message
    pub fn print_error(&self, message: &str) -> io::Result<()> {
        eprintln!("\r\x1b[2KError: {}", message);
        Ok(())
    }

    /// Get the elapsed time since start
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    fn draw_progress(&self, file_id: &str, percent: f64) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        let short_id: String = file_id.chars().take(12).collect();
        write!(stdout, "\r\x1b[2K[{}] {:.1}% | {}", render_bar(percent, 40), percent, short_id)?;
        if percent >= 100.0 {
            writeln!(stdout)?;
            writeln!(stdout, "Download complete: {} ({})", file_id, format_duration(self.elapsed()))?;
        }
        stdout.flush()
    }
}

impl ResultsSink for ProgressDisplay {
    fn report_results(&self, text: &str) {
        let records = self.fresh_records(text);
        if records.is_empty() {
            return;
        }
        // JSON lines are data, so they print even in quiet mode
        if self.quiet && !self.json {
            return;
        }
        let mut stdout = io::stdout().lock();
        for record in &records {
            if let Err(e) = writeln!(stdout, "\r\x1b[2K{}", format_result(record, self.json)) {
                warn!("Failed to print search result: {}", e);
                return;
            }
        }
    }
}

impl ProgressSink for ProgressDisplay {
    fn report_progress(&self, file_id: &str, percent: f64) {
        if self.quiet || !self.should_draw(percent) {
            return;
        }
        if let Err(e) = self.draw_progress(file_id, percent) {
            warn!("Failed to draw progress: {}", e);
        }
    }
}
