//! Forwarding client
//!
//! The controller side of the link: every write goes through one retry loop that
//! owns the only write half, redials with capped exponential backoff, and never
//! lets a new copy loop start before the previous one has reported back.

use crate::backoff::Backoff;
use crate::completion::CompletionSignal;
use crate::config::{ClientConfig, BASE_RETRY_DELAY};
use crate::downstream;
use crate::error::{ClientError, LinkError};
use crate::link::{self, UpstreamLink};
use crate::sink::PacketSink;
use crate::state::{ClientState, StateCell};
use crate::stats::{ClientStats, StatsSnapshot};
use bytes::Bytes;
use packetforward_proto::ClientId;
use packetforward_transport::Dialer;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Forwards whole IP packets to a relay over one reconnecting connection.
///
/// Share it behind an `Arc` to write from several tasks; writes are serialized.
/// Always finish with [`ForwardingClient::close`], which waits for the
/// background reader to stop.
pub struct ForwardingClient<D: Dialer> {
    id: ClientId,
    config: ClientConfig,
    dialer: D,
    sink: Arc<dyn PacketSink>,
    upstream: Mutex<Upstream<D::Conn>>,
    shutdown: CancellationToken,
    state: Arc<StateCell>,
    stats: Arc<ClientStats>,
    span: Span,
}

/// Connection state guarded by the write lock
struct Upstream<C> {
    link: Option<UpstreamLink<C>>,
    /// Copy loop whose termination has not been drained yet
    downstream: Option<DownstreamTask>,
    completion: CompletionSignal,
    generation: u64,
}

struct DownstreamTask {
    generation: u64,
    handle: JoinHandle<()>,
}

impl<D: Dialer> ForwardingClient<D> {
    /// Create a client with a fresh identity. Nothing is dialed until the first write.
    pub fn new(
        config: ClientConfig,
        dialer: D,
        sink: impl PacketSink,
    ) -> Result<Self, ClientError> {
        config.validate()?;

        let id = ClientId::new();
        let span = info_span!("packetforward", client_id = %id);

        Ok(Self {
            id,
            config,
            dialer,
            sink: Arc::new(sink),
            upstream: Mutex::new(Upstream {
                link: None,
                downstream: None,
                completion: CompletionSignal::new(),
                generation: 0,
            }),
            shutdown: CancellationToken::new(),
            state: Arc::new(StateCell::new()),
            stats: Arc::new(ClientStats::default()),
            span,
        })
    }

    /// Log everything this client does, including its copy loops, under `span`
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ClientState {
        self.state.get()
    }

    /// Watch lifecycle transitions, e.g. to surface a degraded connection
    pub fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Send one packet, retrying until it is flushed to the relay.
    ///
    /// Blocks across dial failures and reconnects for as long as it takes. The only
    /// error is [`ClientError::Closed`], once [`ForwardingClient::close`] has been called.
    pub async fn write(&self, packet: &[u8]) -> Result<(), ClientError> {
        self.write_packet(Bytes::copy_from_slice(packet)).await
    }

    /// Same as [`ForwardingClient::write`] without copying the packet
    pub async fn write_packet(&self, packet: Bytes) -> Result<(), ClientError> {
        self.write_to_upstream(packet)
            .instrument(self.span.clone())
            .await
    }

    async fn write_to_upstream(&self, packet: Bytes) -> Result<(), ClientError> {
        if self.shutdown.is_cancelled() {
            return Err(ClientError::Closed);
        }

        let mut upstream = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(ClientError::Closed),
            guard = self.upstream.lock() => guard,
        };

        let mut backoff = Backoff::new(BASE_RETRY_DELAY, self.config.idle_timeout);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(ClientError::Closed),
                _ = backoff.wait() => {}
            }

            let link = match upstream.link.take() {
                Some(link) => link,
                None => {
                    self.await_downstream(&mut upstream).await;

                    let dialed = tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => return Err(ClientError::Closed),
                        dialed = self.dial_upstream(&mut upstream) => dialed,
                    };
                    match dialed {
                        Ok(link) => link,
                        Err(e) => {
                            warn!(error = %e, "Unable to connect upstream");
                            continue;
                        }
                    }
                }
            };

            backoff.reset();

            let link = upstream.link.insert(link);
            let generation = link.generation();
            let sent = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(ClientError::Closed),
                sent = link.send(packet.clone()) => sent,
            };

            match sent {
                Ok(()) => {
                    self.stats.record_sent(packet.len());
                    return Ok(());
                }
                Err(e) => {
                    match e {
                        LinkError::LinkClosed => {
                            debug!(generation, "Upstream already closed, reconnecting")
                        }
                        e => error!(generation, error = %e, "Unexpected error writing to upstream"),
                    }
                    self.stats.record_write_failure();
                    self.close_upstream(&mut upstream);
                    self.state.set(ClientState::Reconnecting);
                }
            }
        }
    }

    /// Dial and identify a new link generation, then start its copy loop
    async fn dial_upstream(
        &self,
        upstream: &mut Upstream<D::Conn>,
    ) -> Result<UpstreamLink<D::Conn>, LinkError> {
        let generation = upstream.generation + 1;

        self.state.set(ClientState::Connecting);
        self.stats.record_dial();
        debug!(generation, "Dialing upstream");

        let (link, downstream) = match link::establish(
            &self.dialer,
            &self.id,
            self.config.idle_timeout,
            generation,
            &self.shutdown,
        )
        .await
        {
            Ok(halves) => halves,
            Err(e) => {
                self.stats.record_dial_failure();
                return Err(e);
            }
        };

        upstream.generation = generation;
        self.stats.record_handshake();
        self.state.set(ClientState::Connected { generation });

        let handle = downstream::spawn(
            downstream,
            self.sink.clone(),
            upstream.completion.publisher(generation),
            self.state.clone(),
            self.stats.clone(),
            self.span.clone(),
        );
        upstream.downstream = Some(DownstreamTask { generation, handle });

        info!(generation, "Connected upstream");
        Ok(link)
    }

    /// Wait until the last copy loop has reported back and exited.
    ///
    /// Its link must already be torn down, otherwise this waits for the relay.
    async fn await_downstream(&self, upstream: &mut Upstream<D::Conn>) {
        let Some(task) = upstream.downstream.take() else {
            return;
        };

        if let Some(termination) = upstream.completion.drain(task.generation).await {
            debug!(
                generation = termination.generation,
                reason = %termination.reason,
                "Previous downstream copy loop finished"
            );
        }
        if let Err(e) = task.handle.await {
            warn!(generation = task.generation, "Downstream copy loop panicked: {}", e);
        }
    }

    fn close_upstream(&self, upstream: &mut Upstream<D::Conn>) {
        if let Some(link) = upstream.link.take() {
            debug!(
                generation = link.generation(),
                already_closed = link.is_closed(),
                "Closing upstream"
            );
            link.close();
        }
    }

    /// Stop the client and wait for its background reader to finish.
    ///
    /// Any write blocked in the retry loop returns [`ClientError::Closed`]. Calling
    /// `close` again is a no-op.
    pub async fn close(&self) -> Result<(), ClientError> {
        async {
            self.shutdown.cancel();

            let mut upstream = self.upstream.lock().await;
            self.close_upstream(&mut upstream);
            self.await_downstream(&mut upstream).await;

            if !self.state.get().is_closed() {
                info!("Forwarding client closed");
            }
            self.state.close();
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }
}

impl<D: Dialer> Drop for ForwardingClient<D> {
    fn drop(&mut self) {
        // Stops a copy loop nobody will ever drain
        self.shutdown.cancel();
    }
}

impl<D: Dialer> std::fmt::Debug for ForwardingClient<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardingClient")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("state", &self.state.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use packetforward_transport::{TransportError, TransportResult};
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    struct RefusingDialer;

    #[async_trait]
    impl Dialer for RefusingDialer {
        type Conn = DuplexStream;

        async fn dial(&self, _deadline: Instant) -> TransportResult<DuplexStream> {
            Err(TransportError::ConnectionError("refused".to_string()))
        }
    }

    fn client() -> ForwardingClient<RefusingDialer> {
        let (tx, _rx) = mpsc::unbounded_channel::<Bytes>();
        let config = ClientConfig::builder()
            .idle_timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        ForwardingClient::new(config, RefusingDialer, tx).unwrap()
    }

    #[tokio::test]
    async fn test_new_client_is_uninitialized() {
        let client = client();
        assert_eq!(client.state(), ClientState::Uninitialized);
        assert_eq!(client.stats(), StatsSnapshot::default());
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn test_close_without_connecting() {
        let client = client();
        client.close().await.unwrap();
        client.close().await.unwrap();

        assert_eq!(client.state(), ClientState::Closed);
        assert!(matches!(client.write(b"pkt").await, Err(ClientError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_capped_by_idle_timeout() {
        let client = Arc::new(client());
        let writer = {
            let client = client.clone();
            tokio::spawn(async move { client.write(b"pkt").await })
        };

        // 50 + 100 + 200 + 400 + 800 + 1000 + 1000 ms of backoff
        tokio::time::sleep(Duration::from_millis(3550 + 25)).await;
        assert_eq!(client.stats().dial_attempts, 8);
        assert_eq!(client.stats().dial_failures, 8);
        assert_eq!(client.state(), ClientState::Connecting);

        client.close().await.unwrap();
        assert!(matches!(writer.await.unwrap(), Err(ClientError::Closed)));
    }

    #[test]
    fn test_zero_idle_timeout_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel::<Bytes>();
        let config = ClientConfig {
            idle_timeout: Duration::ZERO,
        };
        let result = ForwardingClient::new(config, RefusingDialer, tx);
        assert!(matches!(result, Err(ClientError::ConfigError(_))));
    }
}
