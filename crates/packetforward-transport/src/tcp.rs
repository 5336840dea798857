//! Plain TCP dialer

use crate::{Dialer, TransportError, TransportResult};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// Dials the relay over TCP
#[derive(Debug, Clone)]
pub struct TcpDialer {
    addr: String,
}

impl TcpDialer {
    /// `addr` is anything `TcpStream::connect` resolves (e.g. `relay.example.com:9780`)
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    type Conn = TcpStream;

    async fn dial(&self, deadline: Instant) -> TransportResult<TcpStream> {
        debug!(addr = %self.addr, "Dialing relay over TCP");

        let stream = timeout_at(deadline, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| TransportError::Timeout)??;

        // Packets are latency sensitive and already sized by the caller
        stream.set_nodelay(true)?;

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn test_tcp_dialer_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dialer = TcpDialer::new(addr.to_string());
        let (dialed, accepted) = tokio::join!(dialer.dial(deadline()), listener.accept());

        let stream = dialed.unwrap();
        let (_, peer) = accepted.unwrap();
        assert_eq!(stream.local_addr().unwrap(), peer);
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn test_tcp_dialer_refused() {
        // Grab a free port, then close it again
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dialer = TcpDialer::new(addr.to_string());
        let result = dialer.dial(deadline()).await;
        assert!(matches!(result, Err(TransportError::IoError(_))));
    }

    #[tokio::test]
    async fn test_tcp_dialer_expired_deadline() {
        let dialer = TcpDialer::new("127.0.0.1:9");
        let result = dialer.dial(Instant::now()).await;

        // Either the deadline fires first or the port refuses; never success
        assert!(result.is_err());
    }
}
