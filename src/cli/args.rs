//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::node::{DEFAULT_CHUNK_PORT, DEFAULT_CHUNK_SIZE, DEFAULT_DISCOVERY_PORT, DEFAULT_FLOOD_TTL};

/// CLI arguments for the file-sharing node
#[derive(Debug, Parser)]
#[command(name = "peershare")]
#[command(about = "LAN peer-to-peer file sharing over UDP", long_about = None)]
pub struct CliArgs {
    /// Folder whose files are shared
    #[arg(short, long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Folder downloads are written to
    #[arg(short, long, value_name = "DIR")]
    pub dest: Option<PathBuf>,

    /// Subfolder of the root that is not shared (repeatable)
    #[arg(long, value_name = "DIR")]
    pub exclude: Vec<PathBuf>,

    /// File-name mask that is never downloaded, e.g. "*.iso" (repeatable)
    #[arg(long, value_name = "MASK")]
    pub mask: Vec<String>,

    /// UDP port for discovery and search traffic
    #[arg(long, default_value_t = DEFAULT_DISCOVERY_PORT)]
    pub discovery_port: u16,

    /// UDP port for chunk and search-response traffic
    #[arg(long, default_value_t = DEFAULT_CHUNK_PORT)]
    pub chunk_port: u16,

    /// Broadcast destination (repeatable); defaults to 255.255.255.255 on the discovery port
    #[arg(long, value_name = "ADDR")]
    pub broadcast: Vec<SocketAddr>,

    /// IP address peers should reply to
    #[arg(long, value_name = "IP")]
    pub advertise_ip: Option<IpAddr>,

    /// Chunk size in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Hop budget for announcements and searches
    #[arg(long, default_value_t = DEFAULT_FLOOD_TTL)]
    pub ttl: i32,

    /// Search the overlay for file names containing QUERY
    #[arg(short, long, value_name = "QUERY")]
    pub search: Option<String>,

    /// Download the file with this identifier
    #[arg(long, value_name = "ID")]
    pub download: Option<String>,

    /// Spread the download across every known holder
    #[arg(long)]
    pub multi_source: bool,

    /// Seconds to wait for search responses before downloading
    #[arg(long, default_value_t = 3)]
    pub wait_secs: u64,

    /// Print search results as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long)]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let args = CliArgs::try_parse_from(["peershare"]).unwrap();

        assert_eq!(args.discovery_port, 55555);
        assert_eq!(args.chunk_port, 55556);
        assert_eq!(args.chunk_size, 4096);
        assert_eq!(args.ttl, 2);
        assert_eq!(args.wait_secs, 3);
        assert!(args.broadcast.is_empty());
        assert!(!args.multi_source);
        assert_eq!(args.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_repeatable_flags() {
        let args = CliArgs::try_parse_from([
            "peershare",
            "--root",
            "/srv/share",
            "--exclude",
            "/srv/share/private",
            "--exclude",
            "/srv/share/tmp",
            "--mask",
            "*.iso",
            "--broadcast",
            "192.168.1.255:55555",
            "--search",
            "holiday",
            "-v",
        ])
        .unwrap();

        assert_eq!(args.root, Some(PathBuf::from("/srv/share")));
        assert_eq!(args.exclude.len(), 2);
        assert_eq!(args.mask, vec!["*.iso".to_string()]);
        assert_eq!(args.broadcast, vec!["192.168.1.255:55555".parse::<SocketAddr>().unwrap()]);
        assert_eq!(args.search.as_deref(), Some("holiday"));
        assert_eq!(args.log_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_rejects_bad_address() {
        assert!(CliArgs::try_parse_from(["peershare", "--broadcast", "not-an-addr"]).is_err());
    }
}
