//! peershare - Main entry point
//!
//! Runs one overlay node: shares a folder, optionally searches and downloads,
//! and keeps serving until interrupted.

use anyhow::{Context, Result};
use peershare::{CliArgs, Config, Node, ProgressDisplay, ShareError};
use peershare::cli::format_bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();
        match panic_info.location() {
            Some(location) => error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            ),
            None => error!("PANIC occurred at unknown location"),
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up panic handler
    setup_panic_handler();

    // Parse CLI arguments
    let args = CliArgs::parse_args();

    // Initialize logging
    init_logging(&args);
    info!("peershare starting");
    debug!("CLI arguments: {:?}", args);

    // Create and validate configuration
    let config = Config::from_args(&args);
    config.validate()
        .context("Invalid configuration")?;

    let display = Arc::new(ProgressDisplay::new(config.is_quiet(), config.json));
    display_config(&config, &display)?;

    let node = Node::new(config.node.clone(), display.clone(), display.clone())
        .context("Failed to create node")?;
    if let Some(root) = &config.root {
        node.set_root_folder(root.clone()).await;
    }
    node.set_destination_folder(config.dest.clone()).await;
    node.set_excluded_subfolders(config.excluded.clone()).await;
    node.set_download_masks(config.masks.clone()).await;

    node.connect().await
        .map_err(|e| {
            error!("Failed to connect: {}", e);
            e
        })
        .context("Failed to connect to the overlay")?;

    let result = run(&node, &config, &display).await;
    if let Err(e) = &result {
        error!("{:#}", e);
        display.print_error(&format!("{:#}", e))?;
    }

    node.shutdown().await;
    info!("peershare finished");
    result
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let level = args.log_level();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
        debug!("Using pretty log format (verbose mode)");
    } else {
        subscriber.compact().init();
    }
}

/// Display node configuration
fn display_config(config: &Config, display: &ProgressDisplay) -> Result<()> {
    if display.is_quiet() || config.json {
        return Ok(());
    }

    println!("Configuration:");
    match &config.root {
        Some(root) => println!("  Shared folder: {}", root.display()),
        None => println!("  Shared folder: (none)"),
    }
    println!("  Download folder: {}", config.dest.display());
    println!("  Discovery port: {}", config.node.discovery_port);
    println!("  Chunk port: {}", config.node.chunk_port);
    println!("  Chunk size: {}", format_bytes(config.node.chunk_size as u64));
    println!("  Flood TTL: {}", config.node.flood_ttl);
    println!();

    Ok(())
}

/// Search, download, then serve until Ctrl-C
async fn run(node: &Node, config: &Config, display: &ProgressDisplay) -> Result<()> {
    let shared = node.shared_files().await;
    display.print_status(&format!("Sharing {} files as node {}", shared.len(), node.node_id()))?;

    if let Some(query) = &config.search {
        node.search_file(query).await
            .context("Failed to send search")?;
        display.print_status(&format!("Searching for '{}'...", query))?;
        tokio::time::sleep(config.wait).await;
    }

    if let Some(file_id) = &config.download {
        start_download(node, config, file_id).await?;
        if wait_for_download(node, file_id).await {
            return Ok(());
        }
    }

    display.print_status("Serving; press Ctrl-C to stop")?;
    tokio::signal::ctrl_c().await
        .context("Failed to listen for Ctrl-C")?;
    info!("Interrupted, shutting down");
    Ok(())
}

async fn start_download(node: &Node, config: &Config, file_id: &str) -> Result<()> {
    let holders = node.peers_for_file(file_id).await;
    let Some(first) = holders.first() else {
        warn!("No holder known for {}", file_id);
        return Err(ShareError::download_error_for("No known holder; search for the file first", file_id).into());
    };

    let peers = if config.multi_source {
        Some(holders.iter().map(|h| h.addr).collect())
    } else {
        None
    };
    info!("Downloading {} ({}) from {} known holders", file_id, format_bytes(first.size), holders.len());
    node.download_file(file_id, first.size, peers).await
}

/// Block until the session ends; true if Ctrl-C arrived first
async fn wait_for_download(node: &Node, file_id: &str) -> bool {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted while downloading {}", file_id);
                return true;
            }
            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                if !node.is_downloading(file_id).await {
                    return false;
                }
            }
        }
    }
}
