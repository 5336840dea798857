//! Transport abstraction for the forwarding client
//!
//! The forwarding client never opens sockets itself. It is handed a [`Dialer`]
//! that produces a fresh byte stream to the relay whenever a link has to be
//! (re)established, and it decorates whatever comes back with an [`IdleTimeout`].
//!
//! ```text
//! ┌──────────────────────┐   dial(deadline)   ┌──────────────────────┐
//! │  ForwardingClient    │ ─────────────────→ │  Dialer (TCP, mock,  │
//! │  (link manager)      │ ←───────────────── │  TLS, ...)           │
//! └──────────────────────┘   AsyncRead +      └──────────────────────┘
//!                            AsyncWrite
//! ```

pub mod idle;
pub mod tcp;

pub use idle::IdleTimeout;
pub use tcp::TcpDialer;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Timeout")]
    Timeout,

    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Produces new connections to the relay
///
/// Implementations should give up once `deadline` has passed. The caller enforces
/// the deadline as well, so a dialer that ignores it only wastes work.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// The byte stream returned by a successful dial
    type Conn: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Open a new connection to the relay
    async fn dial(&self, deadline: Instant) -> TransportResult<Self::Conn>;
}

#[async_trait]
impl<D: Dialer> Dialer for Arc<D> {
    type Conn = D::Conn;

    async fn dial(&self, deadline: Instant) -> TransportResult<Self::Conn> {
        (**self).dial(deadline).await
    }
}
