//! Relay configuration

use std::time::Duration;

use burrow_pool::{DEFAULT_PORT_RANGE_END, DEFAULT_PORT_RANGE_START};

use crate::error::RelayServerError;

pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";
pub const DEFAULT_LISTEN_PORT: u16 = 10000;
pub const DEFAULT_BUFFER_SIZE: usize = 32;
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Relay configuration, fixed for the lifetime of the process
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Host the agent listener and every ephemeral visitor listener bind to
    pub listen_host: String,
    /// Well-known port agents dial
    pub listen_port: u16,
    /// Size of a single socket read
    pub buffer_size: usize,
    /// Port acquisition attempts per session before giving up
    pub max_retries: u32,
    /// Inclusive range of ephemeral ports handed to sessions
    pub port_range: (u16, u16),
    /// Pause between failed port acquisition attempts
    pub retry_backoff: Duration,
    /// Pause after a failed visitor accept
    pub accept_backoff: Duration,
    /// Upper bound on how long teardown waits for the visitor acceptor
    pub teardown_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_host: DEFAULT_LISTEN_HOST.to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            port_range: (DEFAULT_PORT_RANGE_START, DEFAULT_PORT_RANGE_END),
            retry_backoff: Duration::from_millis(100),
            accept_backoff: Duration::from_millis(50),
            teardown_timeout: Duration::from_secs(1),
        }
    }
}

impl RelayConfig {
    /// Address of the fixed agent-facing listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    pub fn validate(&self) -> Result<(), RelayServerError> {
        if self.listen_host.is_empty() {
            return Err(RelayServerError::InvalidConfig(
                "listen host must not be empty".to_string(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(RelayServerError::InvalidConfig(
                "buffer size must be greater than zero".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(RelayServerError::InvalidConfig(
                "max retries must be at least 1".to_string(),
            ));
        }
        let (start, end) = self.port_range;
        if start == 0 || start > end {
            return Err(RelayServerError::InvalidConfig(format!(
                "invalid ephemeral port range {}-{}",
                start, end
            )));
        }
        Ok(())
    }
}
