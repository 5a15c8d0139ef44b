use thiserror::Error;

/// Port pool errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Invalid port range {start}-{end}: start must be non-zero and not greater than end")]
    InvalidRange { start: u16, end: u16 },

    #[error("Port pool exhausted: every port in {start}-{end} is leased")]
    Exhausted { start: u16, end: u16 },

    #[error("Port {port} is outside the pool range {start}-{end}")]
    OutOfRange { port: u16, start: u16, end: u16 },

    #[error("Port {port} is not leased")]
    NotLeased { port: u16 },
}
