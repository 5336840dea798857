//! Client configuration

use crate::error::ClientError;
use std::time::Duration;

/// Default idle timeout, matching the relay's own session timeout
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(70);

/// First retry delay; doubles on every consecutive failure
pub const BASE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Forwarding client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long a link may stay silent before it is torn down.
    ///
    /// Also bounds each dial attempt and caps the retry backoff, so the client never
    /// waits longer between attempts than it would take to notice a dead link.
    pub idle_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.idle_timeout.is_zero() {
            return Err(ClientError::ConfigError(
                "idle_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ClientConfig, ClientError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
