//! Where inbound packets go

use crate::error::SinkError;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Receives response packets from the relay.
///
/// Called once per received frame, in order, from the link's copy loop. A slow
/// `deliver` stalls that loop. An error tears the link down.
#[async_trait]
pub trait PacketSink: Send + Sync + 'static {
    async fn deliver(&self, packet: Bytes) -> Result<(), SinkError>;
}

#[async_trait]
impl PacketSink for mpsc::Sender<Bytes> {
    async fn deliver(&self, packet: Bytes) -> Result<(), SinkError> {
        self.send(packet).await.map_err(|_| SinkError::Closed)
    }
}

#[async_trait]
impl PacketSink for mpsc::UnboundedSender<Bytes> {
    async fn deliver(&self, packet: Bytes) -> Result<(), SinkError> {
        self.send(packet).map_err(|_| SinkError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.deliver(Bytes::from_static(b"pkt")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"pkt"));
    }

    #[tokio::test]
    async fn test_closed_sink_errors() {
        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
        drop(rx);

        let result = tx.deliver(Bytes::from_static(b"pkt")).await;
        assert!(matches!(result, Err(SinkError::Closed)));
    }
}
