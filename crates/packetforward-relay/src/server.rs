//! Relay server

use crate::config::{RelayConfig, REPLY_QUEUE_DEPTH};
use crate::error::RelayError;
use crate::handler::PacketHandler;
use crate::session::SessionRegistry;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use packetforward_proto::{ClientId, FrameCodec};
use packetforward_transport::IdleTimeout;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Accepts forwarding clients and dispatches their packets
pub struct RelayServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: RelayConfig,
    sessions: Arc<SessionRegistry>,
}

impl RelayServer {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            config: RelayConfig::default(),
            sessions: Arc::new(SessionRegistry::new()),
        })
    }

    pub fn with_config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn sessions(&self) -> Arc<SessionRegistry> {
        self.sessions.clone()
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// Cancelling also closes every open connection.
    pub async fn serve<H: PacketHandler>(
        &self,
        handler: Arc<H>,
        shutdown: CancellationToken,
    ) -> Result<(), RelayError> {
        info!("Relay listening on {}", self.local_addr);

        let mut sweep = tokio::time::interval(self.config.idle_timeout.max(MIN_SWEEP_INTERVAL));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Relay shutting down");
                    return Ok(());
                }
                _ = sweep.tick() => {
                    let evicted = self.sessions.evict_idle(self.config.idle_timeout).await;
                    if evicted > 0 {
                        debug!(evicted, "Evicted idle sessions");
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => {
                        debug!("Accepted connection from {}", peer_addr);
                        let handler = handler.clone();
                        let sessions = self.sessions.clone();
                        let config = self.config.clone();
                        let shutdown = shutdown.child_token();
                        tokio::spawn(async move {
                            match handle_connection(socket, handler, sessions, config, shutdown).await {
                                Ok(()) | Err(RelayError::ConnectionClosed) => {
                                    debug!("Connection from {} finished", peer_addr)
                                }
                                Err(e) => warn!("Connection from {} failed: {}", peer_addr, e),
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }
    }
}

async fn handle_connection<H: PacketHandler>(
    socket: TcpStream,
    handler: Arc<H>,
    sessions: Arc<SessionRegistry>,
    config: RelayConfig,
    shutdown: CancellationToken,
) -> Result<(), RelayError> {
    socket.set_nodelay(true)?;
    let conn = IdleTimeout::new(socket, config.idle_timeout);
    let (mut writer, mut reader) = Framed::new(conn, FrameCodec::big()).split();

    let identity = match timeout(config.handshake_timeout, reader.next()).await {
        Err(_) => return Err(RelayError::HandshakeTimeout(config.handshake_timeout)),
        Ok(None) => return Err(RelayError::ConnectionClosed),
        Ok(Some(frame)) => frame?,
    };
    let id = ClientId::from_frame(&identity)?;

    let (tx, mut rx) = mpsc::channel::<Bytes>(REPLY_QUEUE_DEPTH);
    let (session, connection) = sessions.attach(id, tx).await;

    let span = tracing::info_span!("session", client_id = %id, connection);
    async move {
        info!("Client connected");

        let writer_shutdown = shutdown.clone();
        let writer_task = tokio::spawn(
            async move {
                loop {
                    let packet = tokio::select! {
                        _ = writer_shutdown.cancelled() => break,
                        packet = rx.recv() => match packet {
                            Some(packet) => packet,
                            None => break,
                        },
                    };
                    if let Err(e) = writer.send(packet).await {
                        warn!("Failed to write to client: {}", e);
                        break;
                    }
                }
                // Ends the connection for the client too
                let _ = writer.close().await;
            }
            .in_current_span(),
        );

        let result = loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                frame = reader.next() => frame,
            };
            match frame {
                None => break Err(RelayError::ConnectionClosed),
                Some(Err(e)) => break Err(RelayError::IoError(e)),
                Some(Ok(packet)) if packet.is_empty() => continue,
                Some(Ok(packet)) => {
                    session.record_received();
                    handler.handle(&session, packet.freeze()).await;
                }
            }
        };

        session.detach(connection).await;
        shutdown.cancel();
        if let Err(e) = writer_task.await {
            warn!("Writer task panicked: {}", e);
        }

        info!(
            received = session.packets_received(),
            sent = session.packets_sent(),
            "Client disconnected"
        );
        result
    }
    .instrument(span)
    .await
}
