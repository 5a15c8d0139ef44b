//! Reverse tunnel relay server
//!
//! Agents dial the relay's fixed port; each agent gets an ephemeral public
//! port whose visitors are relayed back over the agent's own connection.

pub mod acceptor;
pub mod chunk;
pub mod config;
pub mod error;
pub mod ipc;
pub mod registry;
pub mod server;
pub mod session;
pub mod visitor;

pub use burrow_pool::{PoolError, PortAllocator, PortPool};
pub use chunk::{chunk_limit, read_chunk};
pub use config::RelayConfig;
pub use error::{RelayServerError, SessionError};
pub use ipc::{relay_channel, AcceptorChannel, ControlCode, Exchange, SupervisorChannel};
pub use registry::{SessionIdGenerator, SessionInfo, SessionRegistry};
pub use server::RelayServer;
pub use session::AgentSession;
