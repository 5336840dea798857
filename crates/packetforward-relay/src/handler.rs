//! Packet handlers

use crate::session::Session;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{trace, warn};

/// Processes packets arriving from clients.
///
/// Called in order for every packet of a connection. A slow handler applies
/// backpressure to that client.
#[async_trait]
pub trait PacketHandler: Send + Sync + 'static {
    async fn handle(&self, session: &Session, packet: Bytes);
}

/// Sends every packet straight back to the client it came from
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

#[async_trait]
impl PacketHandler for EchoHandler {
    async fn handle(&self, session: &Session, packet: Bytes) {
        trace!(client_id = %session.id(), len = packet.len(), "Echoing packet");
        if let Err(e) = session.reply(packet).await {
            warn!(client_id = %session.id(), "Dropping echo: {}", e);
        }
    }
}
