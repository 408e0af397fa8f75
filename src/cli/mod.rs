//! CLI module
//!
//! Command-line interface for the file-sharing node.

pub mod args;
pub mod config;
pub mod progress;

pub use args::CliArgs;
pub use config::Config;
pub use progress::{format_bytes, ProgressDisplay};
