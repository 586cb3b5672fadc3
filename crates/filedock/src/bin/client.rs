//! Filedock Client Binary
//!
//! Run with: cargo run --bin filedock-client

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use filedock::{logging, Client, Config};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "filedock-client", author, version, about = "Filedock file-transfer client")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address
    #[arg(short, long)]
    server: Option<SocketAddr>,

    /// Directory downloads are written to
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Deadline for socket operations, in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload a file
    Put {
        /// Local file path
        local: PathBuf,
        /// Name to store the file under (defaults to the local file name)
        name: Option<String>,
    },
    /// List files on the server
    Ls,
    /// Download a file into the temp directory
    Get {
        /// Stored file name
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match args.config {
        Some(ref path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(server) = args.server {
        config.bind_addr = server;
    }
    if let Some(temp_dir) = args.temp_dir {
        config.temp_dir = temp_dir;
    }
    if let Some(timeout) = args.timeout {
        config.io_timeout_secs = timeout;
    }
    let level = if args.verbose { "filedock=debug" } else { "filedock=warn" };
    config.logging.level = level.to_string();
    config.validate().context("Invalid configuration")?;
    // failures reported by the client land in the same error log as the server's
    let _log_guards = logging::init(&config.logging)?;

    let client = Client::from_config(&config);

    match args.command {
        Commands::Put { local, name } => {
            let name = match name {
                Some(name) => name,
                None => local
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .with_context(|| format!("Cannot derive a name from {}", local.display()))?,
            };
            if !client.upload(&local, &name).await {
                bail!("Upload of {} failed", local.display());
            }
            println!("Uploaded {} as {}", local.display(), name);
        }
        Commands::Ls => {
            for name in client.list().await {
                println!("{name}");
            }
        }
        Commands::Get { name } => match client.download(&name).await {
            Some(path) => println!("{}", path.display()),
            None => bail!("Download of {name} failed"),
        },
    }

    Ok(())
}
