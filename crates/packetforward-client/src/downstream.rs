//! Downstream copy loop
//!
//! Moves frames from one link generation to the caller's sink until something
//! fails, then reports exactly once on the completion signal. Recovery is left
//! to the next write.

use crate::completion::CompletionPublisher;
use crate::error::LinkError;
use crate::link::DownstreamLink;
use crate::sink::PacketSink;
use crate::state::StateCell;
use crate::stats::ClientStats;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument, Span};

/// Spawn the copy loop for one link generation
pub(crate) fn spawn<C>(
    link: DownstreamLink<C>,
    sink: Arc<dyn PacketSink>,
    publisher: CompletionPublisher,
    state: Arc<StateCell>,
    stats: Arc<ClientStats>,
    span: Span,
) -> JoinHandle<()>
where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    // Counted here rather than in the task so the gauge is current once spawn returns
    let active = stats.downstream_started();
    debug!(parent: &span, generation = link.generation(), active, "Copying to downstream");

    tokio::spawn(copy_to_downstream(link, sink, publisher, state, stats).instrument(span))
}

async fn copy_to_downstream<C>(
    mut link: DownstreamLink<C>,
    sink: Arc<dyn PacketSink>,
    publisher: CompletionPublisher,
    state: Arc<StateCell>,
    stats: Arc<ClientStats>,
) where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let generation = link.generation();

    let reason = loop {
        let packet = match link.next_frame().await {
            Ok(packet) => packet,
            Err(e) => break e,
        };
        if packet.is_empty() {
            continue;
        }

        stats.record_received(packet.len());
        if let Err(e) = sink.deliver(packet.freeze()).await {
            break LinkError::SinkDeliveryFailed(e);
        }
    };

    // Releases the transport before anyone can observe the termination
    link.close().await;

    match &reason {
        LinkError::LinkClosed => debug!(generation, "Downstream copy loop stopped"),
        other => warn!(generation, error = %other, "Downstream copy loop failed"),
    }

    state.link_lost(generation);
    stats.downstream_stopped();
    publisher.publish(reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionSignal;
    use crate::error::SinkError;
    use crate::link::establish;
    use crate::state::ClientState;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::{SinkExt, StreamExt};
    use packetforward_proto::{ClientId, FrameCodec};
    use packetforward_transport::{Dialer, TransportResult};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;
    use tokio::time::Instant;
    use tokio_util::codec::Framed;
    use tokio_util::sync::CancellationToken;

    struct OneShotDialer(Mutex<Option<DuplexStream>>);

    #[async_trait]
    impl Dialer for OneShotDialer {
        type Conn = DuplexStream;

        async fn dial(&self, _deadline: Instant) -> TransportResult<DuplexStream> {
            Ok(self.0.lock().unwrap().take().expect("dialed twice"))
        }
    }

    /// Accepts a fixed number of packets, then fails
    struct FailingSink {
        accepted: Mutex<Vec<Bytes>>,
        limit: usize,
    }

    #[async_trait]
    impl PacketSink for FailingSink {
        async fn deliver(&self, packet: Bytes) -> Result<(), SinkError> {
            let mut accepted = self.accepted.lock().unwrap();
            if accepted.len() == self.limit {
                return Err(SinkError::Other("sink full".to_string()));
            }
            accepted.push(packet);
            Ok(())
        }
    }

    async fn connected(
        generation: u64,
    ) -> (DownstreamLink<DuplexStream>, Framed<DuplexStream, FrameCodec>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let dialer = OneShotDialer(Mutex::new(Some(client)));
        let token = CancellationToken::new();
        let (up, down) = establish(
            &dialer,
            &ClientId::new(),
            Duration::from_secs(30),
            generation,
            &token,
        )
        .await
        .unwrap();
        // Dropping the write half alone leaves the link open
        drop(up);
        (down, Framed::new(server, FrameCodec::big()))
    }

    #[tokio::test]
    async fn test_delivers_in_order_then_reports_read_failure() {
        let (link, mut relay) = connected(1).await;
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let mut signal = CompletionSignal::new();
        let state = Arc::new(StateCell::new());
        let stats = Arc::new(ClientStats::default());
        state.set(ClientState::Connected { generation: 1 });

        let handle = spawn(
            link,
            Arc::new(tx),
            signal.publisher(1),
            state.clone(),
            stats.clone(),
            Span::none(),
        );

        // Skip the identity frame
        relay.next().await.unwrap().unwrap();

        for payload in [&b"one"[..], &b""[..], &b"two"[..], &b"three"[..]] {
            relay.send(Bytes::copy_from_slice(payload)).await.unwrap();
        }
        drop(relay);

        let termination = signal.drain(1).await.unwrap();
        assert!(matches!(termination.reason, LinkError::ReadFailed(_)));
        handle.await.unwrap();

        let mut received = Vec::new();
        while let Ok(packet) = rx.try_recv() {
            received.push(packet);
        }
        assert_eq!(received, vec!["one", "two", "three"]);
        assert_eq!(state.get(), ClientState::Reconnecting);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.packets_received, 3);
        assert_eq!(snapshot.active_downstream_loops, 0);
    }

    #[tokio::test]
    async fn test_sink_failure_tears_down_link() {
        let (link, mut relay) = connected(4).await;
        let sink = Arc::new(FailingSink {
            accepted: Mutex::new(Vec::new()),
            limit: 1,
        });
        let mut signal = CompletionSignal::new();

        let handle = spawn(
            link,
            sink.clone(),
            signal.publisher(4),
            Arc::new(StateCell::new()),
            Arc::new(ClientStats::default()),
            Span::none(),
        );

        relay.send(Bytes::from_static(b"kept")).await.unwrap();
        relay.send(Bytes::from_static(b"rejected")).await.unwrap();

        let termination = signal.drain(4).await.unwrap();
        assert_eq!(termination.generation, 4);
        assert!(matches!(
            termination.reason,
            LinkError::SinkDeliveryFailed(SinkError::Other(_))
        ));
        handle.await.unwrap();
        assert_eq!(sink.accepted.lock().unwrap().len(), 1);
    }
}
