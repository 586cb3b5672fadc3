//! Filedock Server Binary
//!
//! Run with: cargo run --bin filedock-server

use anyhow::{Context, Result};
use clap::Parser;
use filedock::{logging, Config, LogFormat, Server};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "filedock-server", author, version, about = "Filedock file-transfer server")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective configuration to --config and exit
    #[arg(long, requires = "config")]
    init_config: bool,

    /// Address to listen on
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Directory holding uploaded files
    #[arg(short, long)]
    storage_dir: Option<PathBuf>,

    /// Deadline for socket operations, in seconds
    #[arg(long)]
    io_timeout: Option<u64>,

    /// Verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,

    /// Log format (json or text)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Log file path
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Error log file path
    #[arg(long)]
    error_log: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match args.config {
        Some(ref path) if path.exists() && !args.init_config => Config::from_file(path)?,
        _ => Config::default(),
    };

    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(storage_dir) = args.storage_dir {
        config.storage_dir = storage_dir;
    }
    if let Some(io_timeout) = args.io_timeout {
        config.io_timeout_secs = io_timeout;
    }
    if let Some(log_format) = args.log_format {
        config.logging.format = log_format;
    }
    if let Some(log_file) = args.log_file {
        config.logging.file = Some(log_file);
    }
    if let Some(error_log) = args.error_log {
        config.logging.error_log = Some(error_log);
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }

    if args.init_config {
        if let Some(path) = args.config {
            config
                .write_to(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote config to {}", path.display());
        }
        return Ok(());
    }

    config.validate().context("Invalid configuration")?;
    let _log_guards = logging::init(&config.logging)?;

    info!(
        event = "server_starting",
        version = env!("CARGO_PKG_VERSION"),
        "Starting filedock server"
    );
    info!(
        event = "server_configuration",
        bind_addr = %config.bind_addr,
        storage_dir = %config.storage_dir.display(),
        io_timeout_secs = config.io_timeout_secs,
        max_upload_bytes = config.max_upload_bytes,
        log_format = ?config.logging.format,
        log_file = ?config.logging.file,
        error_log = ?config.logging.error_log,
        "Server configuration"
    );

    let server = Server::new(config)
        .await
        .context("Failed to create server")?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!(event = "shutdown_requested", "Shutdown signal received");
        })
        .await
        .context("Server failed")?;

    info!(event = "server_shutdown", "Filedock server shutdown complete");
    Ok(())
}
