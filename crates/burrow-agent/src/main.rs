//! Burrow Agent - exposes a local service through a burrow relay
//!
//! Dials out to the relay, so the service needs no inbound connectivity.

use anyhow::Result;
use burrow_agent::{Agent, AgentConfig, AgentMode};
use clap::Parser;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Burrow agent - answers relay traffic by echoing or forwarding to a local target
#[derive(Parser, Debug)]
#[command(name = "burrow-agent")]
#[command(version)]
#[command(long_about = r#"
Burrow Agent connects to a relay server and answers every chunk the relay
sends. Without --target it echoes the chunk back; with --target it passes
the chunk to that address and returns the answer.

EXAMPLES:
  # Echo agent against a local relay
  burrow-agent --host 127.0.0.1 --port 10000

  # Expose a local HTTP service
  burrow-agent --host relay.example.com --target 127.0.0.1:8080

ENVIRONMENT VARIABLES:
  BURROW_RELAY_HOST  Relay host
  BURROW_RELAY_PORT  Relay port
  BURROW_TARGET      Local target address (host:port)
"#)]
struct Args {
    /// Relay host
    #[arg(long, env = "BURROW_RELAY_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Relay port
    #[arg(long, env = "BURROW_RELAY_PORT", default_value_t = 10000)]
    port: u16,

    /// Local target to forward requests to (echo mode when omitted)
    #[arg(long, env = "BURROW_TARGET")]
    target: Option<String>,

    /// Socket read size in bytes
    #[arg(long, default_value_t = 1024)]
    buffer_size: usize,

    /// Seconds to wait before redialing the relay
    #[arg(long, default_value_t = 3)]
    reconnect_secs: u64,

    /// Exit after the first relay connection ends
    #[arg(long)]
    no_reconnect: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let mode = match args.target {
        Some(target) => AgentMode::Forward { target },
        None => AgentMode::Echo,
    };
    info!("Starting burrow agent ({:?})", mode);

    let agent = Agent::new(AgentConfig {
        relay_host: args.host,
        relay_port: args.port,
        buffer_size: args.buffer_size,
        mode,
    });

    loop {
        match agent.run().await {
            Ok(stats) => info!(
                requests = stats.requests,
                bytes_in = stats.bytes_in,
                bytes_out = stats.bytes_out,
                "Relay connection ended"
            ),
            Err(e) => {
                if args.no_reconnect {
                    return Err(e.into());
                }
                error!("Relay connection failed: {}", e);
            }
        }

        if args.no_reconnect {
            return Ok(());
        }
        info!("Reconnecting in {}s", args.reconnect_secs);
        tokio::time::sleep(Duration::from_secs(args.reconnect_secs)).await;
    }
}
