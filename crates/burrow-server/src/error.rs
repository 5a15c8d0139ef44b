use thiserror::Error;

/// Main server errors
#[derive(Debug, Error)]
pub enum RelayServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors that end a single agent session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("No ephemeral listener after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}
