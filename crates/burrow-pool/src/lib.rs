//! Ephemeral port pool for relay sessions
//!
//! Hands out public ports to agent sessions and takes them back on teardown.
//! The pool only tracks leases; binding the port is the caller's job.

mod error;
mod pool;

pub use error::PoolError;
pub use pool::{PortPool, DEFAULT_PORT_RANGE_END, DEFAULT_PORT_RANGE_START};

/// Seam between session supervisors and the port table.
///
/// Implementations must serialize every call; no call may block on I/O.
pub trait PortAllocator: Send + Sync {
    /// Lease the next free port, or fail with [`PoolError::Exhausted`].
    fn acquire(&self) -> Result<u16, PoolError>;

    /// Return a leased port to the pool.
    fn release(&self, port: u16) -> Result<(), PoolError>;
}
