//! Main server: accepts agents on the fixed public port

use burrow_pool::{PortAllocator, PortPool};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::error::{RelayServerError, SessionError};
use crate::registry::{SessionIdGenerator, SessionRegistry};
use crate::session::AgentSession;

/// Reverse tunnel relay server
pub struct RelayServer {
    config: Arc<RelayConfig>,
    pool: Arc<dyn PortAllocator>,
    registry: Arc<SessionRegistry>,
    session_ids: SessionIdGenerator,
}

impl RelayServer {
    pub fn new(config: RelayConfig, pool: Arc<dyn PortAllocator>) -> Self {
        Self {
            config: Arc::new(config),
            pool,
            registry: Arc::new(SessionRegistry::new()),
            session_ids: SessionIdGenerator::new(),
        }
    }

    /// Build a server backed by a [`PortPool`] over `config.port_range`
    pub fn from_config(config: RelayConfig) -> Result<Self, RelayServerError> {
        config.validate()?;
        let (start, end) = config.port_range;
        let pool = PortPool::new(start, end)
            .map_err(|e| RelayServerError::InvalidConfig(e.to_string()))?;
        info!(
            "Ephemeral port range: {}-{} ({} ports available)",
            start,
            end,
            pool.capacity()
        );
        Ok(Self::new(config, Arc::new(pool)))
    }

    pub fn with_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Bind the agent-facing listener
    pub async fn bind(&self) -> Result<TcpListener, RelayServerError> {
        self.config.validate()?;

        let address = self.config.listen_addr();
        TcpListener::bind(&address)
            .await
            .map_err(|e| RelayServerError::BindError {
                address: self.config.listen_host.clone(),
                port: self.config.listen_port,
                reason: e.to_string(),
            })
    }

    /// Bind and serve until the task is dropped
    pub async fn start(&self) -> Result<(), RelayServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept agents on an already bound listener, one session task each.
    /// A failed accept is logged and the loop keeps going.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayServerError> {
        let local_addr = listener.local_addr()?;
        info!("Relay server listening for agents on {}", local_addr);

        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    let session_id = self.session_ids.generate();
                    info!(session = session_id, "Agent connected from {}", peer_addr);

                    let session = AgentSession::new(
                        session_id,
                        socket,
                        peer_addr,
                        self.config.clone(),
                        self.pool.clone(),
                        self.registry.clone(),
                    );

                    tokio::spawn(async move {
                        match session.run().await {
                            Ok(()) => {
                                debug!(session = session_id, "Session for {} finished", peer_addr)
                            }
                            Err(SessionError::RetriesExhausted { .. }) => {}
                            Err(e) => {
                                warn!(
                                    session = session_id,
                                    "Session for {} failed: {}", peer_addr, e
                                )
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept agent connection: {}", e);
                    tokio::time::sleep(self.config.accept_backoff).await;
                }
            }
        }
    }
}
