//! Reference agent for the burrow relay
//!
//! Dials the relay and answers each request chunk it receives, either by
//! echoing it or by passing it to a local target service and relaying the
//! target's answer.

use burrow_server::read_chunk;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Errors that can occur while serving the relay
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Failed to connect to {address}: {source}")]
    ConnectionFailed {
        address: String,
        source: std::io::Error,
    },

    #[error("IO error during relay: {0}")]
    Io(#[from] std::io::Error),
}

/// How the agent answers requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentMode {
    /// Reply with the request itself
    Echo,
    /// Pass each request to `target` and reply with what it answers
    Forward { target: String },
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub relay_host: String,
    pub relay_port: u16,
    pub buffer_size: usize,
    pub mode: AgentMode,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            relay_host: "127.0.0.1".to_string(),
            relay_port: 10000,
            buffer_size: 1024,
            mode: AgentMode::Echo,
        }
    }
}

/// Totals for one relay connection
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AgentStats {
    pub requests: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

pub struct Agent {
    config: AgentConfig,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    pub fn relay_addr(&self) -> String {
        format!("{}:{}", self.config.relay_host, self.config.relay_port)
    }

    /// Serve one relay connection until the relay or the target closes it.
    pub async fn run(&self) -> Result<AgentStats, AgentError> {
        let relay_addr = self.relay_addr();
        let mut relay = connect(&relay_addr).await?;
        info!("Connected to relay {}", relay_addr);

        let mut target = match &self.config.mode {
            AgentMode::Echo => None,
            AgentMode::Forward { target } => {
                let stream = connect(target).await?;
                info!("Forwarding requests to {}", target);
                Some(stream)
            }
        };

        let mut stats = AgentStats::default();
        loop {
            let request = match read_chunk(&mut relay, self.config.buffer_size).await? {
                Some(request) => request,
                None => {
                    info!("Relay closed the connection");
                    break;
                }
            };
            let request_len = request.len();
            stats.requests += 1;
            stats.bytes_in += request_len as u64;

            let reply = match target.as_mut() {
                None => request,
                Some(target) => match self.ask_target(target, &request).await? {
                    Some(reply) => reply,
                    None => {
                        info!("Target closed the connection");
                        break;
                    }
                },
            };

            relay.write_all(&reply).await?;
            stats.bytes_out += reply.len() as u64;
            debug!("Relayed {} byte request, {} byte reply", request_len, reply.len());
        }

        let _ = relay.shutdown().await;
        Ok(stats)
    }

    async fn ask_target(
        &self,
        target: &mut TcpStream,
        request: &Bytes,
    ) -> Result<Option<Bytes>, AgentError> {
        target.write_all(request).await?;
        Ok(read_chunk(target, self.config.buffer_size).await?)
    }
}

async fn connect(address: &str) -> Result<TcpStream, AgentError> {
    TcpStream::connect(address)
        .await
        .map_err(|source| AgentError::ConnectionFailed {
            address: address.to_string(),
            source,
        })
}
