//! UTCP Bridge
//!
//! TigerStyle: One client, one stdio channel, logs on stderr only.

mod server;

use anyhow::{Context, Result};
use clap::Parser;
use server::BridgeServer;
use std::path::PathBuf;
use std::sync::Arc;
use utcp_client::UtcpClient;
use utcp_core::{init_telemetry, TelemetryConfig, UtcpClientConfig};

/// Expose a UTCP client as an MCP server over stdio
#[derive(Parser, Debug)]
#[command(name = "utcp-bridge")]
#[command(about = "Serve UTCP manuals and tools to MCP clients over stdio")]
#[command(version)]
struct Cli {
    /// Client configuration file (JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base directory for relative paths (default: the config file's directory)
    #[arg(long)]
    root_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn root_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.root_dir {
            return Ok(dir.clone());
        }
        if let Some(parent) = self
            .config
            .as_deref()
            .and_then(|path| path.parent())
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            return Ok(parent.to_path_buf());
        }
        std::env::current_dir().context("Failed to read current directory")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    init_telemetry(
        TelemetryConfig::new("utcp-bridge")
            .with_log_level(filter)
            .with_stderr(),
    )
    .context("Failed to initialize logging")?;

    let config = match &cli.config {
        Some(path) => UtcpClientConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => UtcpClientConfig::new(),
    };
    let root_dir = cli.root_dir()?;

    let client = UtcpClient::with_default_plugins(Some(root_dir), config)
        .await
        .context("Failed to create UTCP client")?;
    let client = Arc::new(client);

    let server = BridgeServer::new(client.clone());
    let served = server
        .serve(tokio::io::BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await;

    if let Err(e) = client.close().await {
        tracing::warn!(error = %e, "Failed to close client cleanly");
    }
    served
}
