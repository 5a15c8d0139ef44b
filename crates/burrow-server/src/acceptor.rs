//! Visitor acceptor: one per agent session, owns the ephemeral listener

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::ipc::{AcceptorChannel, ControlCode};
use crate::registry::SessionIdGenerator;
use crate::visitor::VisitorSession;

pub struct VisitorAcceptor {
    session_id: u64,
    listener: TcpListener,
    channel: AcceptorChannel,
    config: Arc<RelayConfig>,
    visitor_ids: SessionIdGenerator,
}

impl VisitorAcceptor {
    pub fn new(
        session_id: u64,
        listener: TcpListener,
        channel: AcceptorChannel,
        config: Arc<RelayConfig>,
    ) -> Self {
        Self {
            session_id,
            listener,
            channel,
            config,
            visitor_ids: SessionIdGenerator::new(),
        }
    }

    /// Accept visitors until StopAccept arrives. The listener is closed on return.
    pub async fn run(mut self) {
        let port = self
            .listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or_default();

        info!(
            session = self.session_id,
            port, "Accepting visitors"
        );

        loop {
            tokio::select! {
                biased;

                code = self.channel.recv_control() => {
                    if code == ControlCode::StopAccept {
                        break;
                    }
                    debug!(session = self.session_id, ?code, "Ignoring control code");
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let visitor_id = self.visitor_ids.generate();
                        debug!(
                            session = self.session_id,
                            visitor = visitor_id,
                            "Visitor connected from {}",
                            peer_addr
                        );

                        let visitor = VisitorSession::new(
                            self.session_id,
                            visitor_id,
                            stream,
                            peer_addr,
                            self.channel.visitor(),
                            self.config.buffer_size,
                        );
                        tokio::spawn(visitor.run());
                    }
                    Err(e) => {
                        if self.channel.stop_requested() {
                            break;
                        }
                        warn!(
                            session = self.session_id,
                            port,
                            "Failed to accept visitor, retrying: {}",
                            e
                        );
                        tokio::time::sleep(self.config.accept_backoff).await;
                    }
                },
            }
        }

        info!(session = self.session_id, port, "Stopped accepting visitors");
    }
}
