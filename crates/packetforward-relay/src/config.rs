//! Relay configuration

use std::time::Duration;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:9780";

/// How long a connection may stay silent, and how long a detached session is kept
pub const DEFAULT_SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(70);

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Depth of each connection's reply queue
pub const REPLY_QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub idle_timeout: Duration,
    /// Time allowed between accept and the identity frame
    pub handshake_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_SESSION_IDLE_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}
