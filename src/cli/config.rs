//! CLI configuration module
//!
//! Validated settings for one CLI run, built from the parsed arguments.

use crate::cli::args::CliArgs;
use crate::error::ShareError;
use crate::node::NodeConfig;
use crate::storage::DownloadMasks;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::Result;

/// Configuration for the file-sharing node
#[derive(Debug, Clone)]
pub struct Config {
    /// Library-level node settings
    pub node: NodeConfig,
    /// Shared folder
    pub root: Option<PathBuf>,
    /// Download folder
    pub dest: PathBuf,
    /// Subfolders of the root that are not shared
    pub excluded: Vec<PathBuf>,
    /// Names that are never downloaded
    pub masks: DownloadMasks,
    /// Query to search for after connecting
    pub search: Option<String>,
    /// Identifier to download
    pub download: Option<String>,
    /// Spread the download across every known holder
    pub multi_source: bool,
    /// How long to wait for search responses
    pub wait: Duration,
    /// Print search results as JSON lines
    pub json: bool,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Self {
        let dest = args.dest
            .clone()
            .unwrap_or_else(|| PathBuf::from("./downloads"));

        let node = NodeConfig {
            discovery_port: args.discovery_port,
            chunk_port: args.chunk_port,
            broadcast_targets: args.broadcast.clone(),
            advertise_ip: args.advertise_ip,
            chunk_size: args.chunk_size,
            flood_ttl: args.ttl,
            ..NodeConfig::default()
        };

        Self {
            node,
            root: args.root.clone(),
            dest,
            excluded: args.exclude.clone(),
            masks: DownloadMasks::new(&args.mask),
            search: args.search.clone(),
            download: args.download.clone(),
            multi_source: args.multi_source,
            wait: Duration::from_secs(args.wait_secs),
            json: args.json,
            verbose: args.verbose,
            quiet: args.quiet,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.node.validate()?;

        if self.dest.as_os_str().is_empty() {
            return Err(ShareError::config_error_with_field("dest cannot be empty", "dest").into());
        }

        if let Some(root) = &self.root {
            if !root.is_dir() {
                return Err(ShareError::config_error_with_field(
                    format!("root '{}' is not a directory", root.display()),
                    "root",
                )
                .into());
            }
        }

        if let Some(query) = &self.search {
            if query.trim().is_empty() {
                return Err(ShareError::validation_error_with_field("search query cannot be empty", "search").into());
            }
        }

        if let Some(id) = &self.download {
            if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ShareError::validation_error_with_field(
                    format!("'{}' is not a hex file identifier", id),
                    "download",
                )
                .into());
            }
        }

        Ok(())
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}
