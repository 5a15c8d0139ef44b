//! Agent session supervisor
//!
//! Turns one accepted agent connection into a running tunnel: leases an
//! ephemeral port, starts the visitor acceptor on it, relays request chunks
//! to the agent and replies back, then tears everything down when any leg
//! fails.

use burrow_pool::PortAllocator;
use bytes::BytesMut;
use chrono::Utc;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::acceptor::VisitorAcceptor;
use crate::chunk::{chunk_limit, read_chunk};
use crate::config::RelayConfig;
use crate::error::SessionError;
use crate::ipc::{relay_channel, SupervisorChannel};
use crate::registry::{SessionInfo, SessionRegistry};

/// Byte counters for the agent leg
#[derive(Debug, Default, Clone, Copy)]
struct RelayStats {
    exchanges: u64,
    bytes_to_agent: u64,
    bytes_from_agent: u64,
    bytes_dropped: u64,
}

pub struct AgentSession {
    id: u64,
    agent: TcpStream,
    agent_addr: SocketAddr,
    config: Arc<RelayConfig>,
    pool: Arc<dyn PortAllocator>,
    registry: Arc<SessionRegistry>,
}

impl AgentSession {
    pub fn new(
        id: u64,
        agent: TcpStream,
        agent_addr: SocketAddr,
        config: Arc<RelayConfig>,
        pool: Arc<dyn PortAllocator>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            id,
            agent,
            agent_addr,
            config,
            pool,
            registry,
        }
    }

    /// Run the session to completion.
    ///
    /// Returns `Ok` when the agent disconnected cleanly. Every exit path past
    /// a successful bind goes through [`AgentSession::teardown`].
    pub async fn run(mut self) -> Result<(), SessionError> {
        let (listener, port) = match self.bind_with_retry().await {
            Ok(bound) => bound,
            Err(e) => {
                error!(session = self.id, "Giving up on agent {}: {}", self.agent_addr, e);
                let _ = self.agent.shutdown().await;
                return Err(e);
            }
        };

        let started_at = Utc::now();
        self.registry.register(SessionInfo {
            id: self.id,
            port,
            agent_addr: self.agent_addr,
            started_at,
        });

        info!(
            session = self.id,
            port,
            "Agent {} exposed on {}:{}",
            self.agent_addr,
            self.config.listen_host,
            port
        );

        let (mut channel, acceptor_channel) = relay_channel();
        let acceptor = tokio::spawn(
            VisitorAcceptor::new(self.id, listener, acceptor_channel, self.config.clone()).run(),
        );

        let mut stats = RelayStats::default();
        let outcome = self.relay(&mut channel, &mut stats).await;

        self.teardown(channel, acceptor, port).await;

        let duration_ms = (Utc::now() - started_at).num_milliseconds();
        info!(
            session = self.id,
            port,
            exchanges = stats.exchanges,
            bytes_to_agent = stats.bytes_to_agent,
            bytes_from_agent = stats.bytes_from_agent,
            bytes_dropped = stats.bytes_dropped,
            duration_ms,
            "Session closed"
        );

        outcome.map_err(SessionError::from)
    }

    /// Lease a port and bind it, up to `max_retries` attempts.
    ///
    /// A failed bind returns its port to the pool before the next attempt, so
    /// nothing stays leased or bound when this gives up.
    async fn bind_with_retry(&self) -> Result<(TcpListener, u16), SessionError> {
        let max_retries = self.config.max_retries;
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=max_retries {
            match self.pool.acquire() {
                Ok(port) => {
                    match TcpListener::bind((self.config.listen_host.as_str(), port)).await {
                        Ok(listener) => {
                            if attempt > 1 {
                                info!(
                                    session = self.id,
                                    "Bound port {} on attempt {}/{}", port, attempt, max_retries
                                );
                            }
                            return Ok((listener, port));
                        }
                        Err(e) => {
                            if let Err(release_err) = self.pool.release(port) {
                                warn!(
                                    session = self.id,
                                    "Failed to release port {}: {}", port, release_err
                                );
                            }
                            last_error =
                                format!("bind {}:{}: {}", self.config.listen_host, port, e);
                        }
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            warn!(
                session = self.id,
                "Ephemeral listener attempt {}/{} failed: {}", attempt, max_retries, last_error
            );
            if attempt < max_retries {
                tokio::time::sleep(self.config.retry_backoff).await;
            }
        }

        Err(SessionError::RetriesExhausted {
            attempts: max_retries,
            last_error,
        })
    }

    /// Agent-side relay loop. At most one exchange is in flight to the agent.
    ///
    /// While idle the agent socket is still read, so EOF ends the session even
    /// when no visitor is active. Bytes the agent sends ahead of a request are
    /// held, up to one chunk, and returned as the next reply; the rest is
    /// dropped.
    ///
    /// `Ok(())` on agent EOF; `Err` on any socket failure.
    async fn relay(
        &mut self,
        channel: &mut SupervisorChannel,
        stats: &mut RelayStats,
    ) -> io::Result<()> {
        let buffer_size = self.config.buffer_size;
        let limit = chunk_limit(buffer_size);
        let mut held = BytesMut::new();

        loop {
            let exchange = tokio::select! {
                exchange = channel.next_exchange() => exchange,
                read = read_chunk(&mut self.agent, buffer_size) => match read? {
                    None => {
                        info!(session = self.id, "Agent {} disconnected", self.agent_addr);
                        return Ok(());
                    }
                    Some(early) => {
                        stats.bytes_from_agent += early.len() as u64;
                        let keep = early.len().min(limit - held.len());
                        held.extend_from_slice(&early[..keep]);
                        if keep < early.len() {
                            stats.bytes_dropped += (early.len() - keep) as u64;
                            warn!(
                                session = self.id,
                                "Dropped {} unsolicited bytes from agent",
                                early.len() - keep
                            );
                        } else {
                            debug!(session = self.id, "Agent sent data with no request pending");
                        }
                        continue;
                    }
                },
            };

            let Some(exchange) = exchange else {
                debug!(session = self.id, "Data queue closed");
                return Ok(());
            };

            self.agent.write_all(&exchange.chunk).await?;
            stats.bytes_to_agent += exchange.chunk.len() as u64;

            let reply = if held.is_empty() {
                match read_chunk(&mut self.agent, buffer_size).await? {
                    Some(reply) => {
                        stats.bytes_from_agent += reply.len() as u64;
                        reply
                    }
                    None => {
                        info!(
                            session = self.id,
                            "Agent {} disconnected mid-exchange", self.agent_addr
                        );
                        return Ok(());
                    }
                }
            } else {
                held.split().freeze()
            };
            stats.exchanges += 1;

            if exchange.reply.send(reply).is_err() {
                debug!(session = self.id, "Visitor left before the agent replied");
            }
        }
    }

    /// Signal both control queues, close the listener and the agent
    /// connection, and return the port. Runs once per bound session.
    async fn teardown(
        &mut self,
        channel: SupervisorChannel,
        mut acceptor: JoinHandle<()>,
        port: u16,
    ) {
        channel.stop_accept();
        channel.stop_clients();

        // The acceptor owns the listener; it is closed once the task returns
        if tokio::time::timeout(self.config.teardown_timeout, &mut acceptor)
            .await
            .is_err()
        {
            warn!(session = self.id, port, "Visitor acceptor did not stop in time, aborting");
            acceptor.abort();
            let _ = acceptor.await;
        }

        if let Err(e) = self.agent.shutdown().await {
            debug!(session = self.id, "Agent shutdown: {}", e);
        }

        // Pending exchanges get a dropped reply slot and stop their visitors
        drop(channel);

        if let Err(e) = self.pool.release(port) {
            warn!(session = self.id, "Failed to release port {}: {}", port, e);
        }
        self.registry.unregister(self.id);
    }
}
