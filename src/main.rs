//! Burrow relay server
//!
//! Agents behind NAT dial the relay's fixed port; each one is given an
//! ephemeral public port whose visitors are relayed back over the agent's
//! own outbound connection.

use anyhow::{Context, Result};
use burrow_pool::{DEFAULT_PORT_RANGE_END, DEFAULT_PORT_RANGE_START};
use burrow_server::{RelayConfig, RelayServer};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Reverse tunnel relay - exposes NATed agents on ephemeral public ports
#[derive(Parser, Debug)]
#[command(name = "burrow-relay")]
#[command(about = "Run a burrow reverse tunnel relay", long_about = None)]
#[command(version)]
struct Args {
    /// Listen host for the agent port and every ephemeral port
    #[arg(long, env = "BURROW_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Fixed port agents connect to
    #[arg(long, env = "BURROW_PORT", default_value_t = 10000)]
    port: u16,

    /// Socket read size in bytes
    #[arg(long, env = "BURROW_BUFFER_SIZE", default_value_t = 32)]
    buffer_size: usize,

    /// Ephemeral port acquisition attempts per agent
    #[arg(long, env = "BURROW_MAX_RETRIES", default_value_t = 5)]
    max_retries: u32,

    /// Ephemeral port range (format: "20001-65000")
    #[arg(long, env = "BURROW_PORT_RANGE")]
    port_range: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let (range_start, range_end) = match args.port_range.as_deref() {
        Some(range) => parse_port_range(range)?,
        None => (DEFAULT_PORT_RANGE_START, DEFAULT_PORT_RANGE_END),
    };

    let config = RelayConfig {
        listen_host: args.host,
        listen_port: args.port,
        buffer_size: args.buffer_size,
        max_retries: args.max_retries,
        port_range: (range_start, range_end),
        ..Default::default()
    };

    let server = RelayServer::from_config(config).context("Invalid relay configuration")?;
    let listener = match server.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    info!(
        "Listening on host [{}:{}]",
        server.config().listen_host,
        server.config().listen_port
    );
    info!("Press Ctrl+C to stop");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.serve(listener).await {
            error!("Relay server error: {}", e);
        }
    });

    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, stopping relay..."),
        Err(err) => error!("Error listening for shutdown signal: {}", err),
    }

    server_handle.abort();
    info!("Relay stopped");

    Ok(())
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn parse_port_range(range_str: &str) -> Result<(u16, u16)> {
    let (start, end) = range_str.split_once('-').ok_or_else(|| {
        anyhow::anyhow!("Invalid port range format. Expected: START-END (e.g., 20001-65000)")
    })?;

    let start: u16 = start
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid start port: {}", start))?;
    let end: u16 = end
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid end port: {}", end))?;

    if start == 0 || start > end {
        return Err(anyhow::anyhow!(
            "Start port must be non-zero and not greater than end port"
        ));
    }

    Ok((start, end))
}
