//! Per-session relay channel
//!
//! One data queue carries request chunks from visitor handlers to the
//! supervisor, each paired with the slot its reply goes back through. Two
//! control queues carry shutdown codes from the supervisor to the acceptor
//! and to every visitor handler.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

/// Shutdown codes sent by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    /// Visitor acceptor must stop accepting and drop its listener
    StopAccept,
    /// Visitor handlers must close their connections
    StopClient,
}

/// One request chunk waiting for the agent's reply
#[derive(Debug)]
pub struct Exchange {
    pub chunk: Bytes,
    pub reply: oneshot::Sender<Bytes>,
}

/// The visitor leg was told to stop, or the supervisor is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStopped;

/// Create the channel bundle for one agent session.
pub fn relay_channel() -> (SupervisorChannel, AcceptorChannel) {
    // Smallest capacity tokio allows: at most one exchange waits here
    let (data_tx, data_rx) = mpsc::channel(1);
    let (server_ctrl_tx, server_ctrl_rx) = mpsc::channel(1);
    let (client_ctrl_tx, client_ctrl_rx) = watch::channel(None);

    (
        SupervisorChannel {
            data: data_rx,
            server_ctrl: server_ctrl_tx,
            client_ctrl: client_ctrl_tx,
        },
        AcceptorChannel {
            data: data_tx,
            server_ctrl: server_ctrl_rx,
            client_ctrl: client_ctrl_rx,
        },
    )
}

/// Supervisor side: consumes exchanges, owns both control queues
pub struct SupervisorChannel {
    data: mpsc::Receiver<Exchange>,
    server_ctrl: mpsc::Sender<ControlCode>,
    client_ctrl: watch::Sender<Option<ControlCode>>,
}

impl SupervisorChannel {
    /// Next request from any visitor. `None` once every producer is gone.
    pub async fn next_exchange(&mut self) -> Option<Exchange> {
        self.data.recv().await
    }

    /// Tell the acceptor to stop. Never blocks.
    pub fn stop_accept(&self) {
        if let Err(e) = self.server_ctrl.try_send(ControlCode::StopAccept) {
            debug!("StopAccept not delivered: {}", e);
        }
    }

    /// Tell every visitor handler, current and future, to stop. Never blocks.
    pub fn stop_clients(&self) {
        self.client_ctrl.send_replace(Some(ControlCode::StopClient));
    }
}

/// Acceptor side: receives StopAccept, hands out visitor endpoints
pub struct AcceptorChannel {
    data: mpsc::Sender<Exchange>,
    server_ctrl: mpsc::Receiver<ControlCode>,
    client_ctrl: watch::Receiver<Option<ControlCode>>,
}

impl AcceptorChannel {
    /// Wait for the next control code. A dropped supervisor reads as StopAccept.
    pub async fn recv_control(&mut self) -> ControlCode {
        self.server_ctrl
            .recv()
            .await
            .unwrap_or(ControlCode::StopAccept)
    }

    /// Non-blocking check used after a failed accept.
    pub fn stop_requested(&mut self) -> bool {
        match self.server_ctrl.try_recv() {
            Ok(code) => code == ControlCode::StopAccept,
            Err(mpsc::error::TryRecvError::Empty) => false,
            Err(mpsc::error::TryRecvError::Disconnected) => true,
        }
    }

    pub fn visitor(&self) -> VisitorChannel {
        VisitorChannel {
            data: self.data.clone(),
            client_ctrl: self.client_ctrl.clone(),
        }
    }
}

/// Visitor side: submits chunks and waits for replies or StopClient
pub struct VisitorChannel {
    data: mpsc::Sender<Exchange>,
    client_ctrl: watch::Receiver<Option<ControlCode>>,
}

impl VisitorChannel {
    /// Resolves once StopClient is published or the supervisor is gone.
    pub async fn stopped(&mut self) {
        wait_for_stop(&mut self.client_ctrl).await
    }

    /// Send one chunk to the agent and wait for its reply.
    pub async fn round_trip(&mut self, chunk: Bytes) -> Result<Bytes, RelayStopped> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = Exchange {
            chunk,
            reply: reply_tx,
        };

        tokio::select! {
            biased;
            _ = wait_for_stop(&mut self.client_ctrl) => return Err(RelayStopped),
            sent = self.data.send(exchange) => sent.map_err(|_| RelayStopped)?,
        }

        tokio::select! {
            biased;
            _ = wait_for_stop(&mut self.client_ctrl) => Err(RelayStopped),
            reply = reply_rx => reply.map_err(|_| RelayStopped),
        }
    }
}

async fn wait_for_stop(client_ctrl: &mut watch::Receiver<Option<ControlCode>>) {
    // Err means the supervisor dropped its sender, which is a stop as well
    let _ = client_ctrl
        .wait_for(|code| *code == Some(ControlCode::StopClient))
        .await;
}
