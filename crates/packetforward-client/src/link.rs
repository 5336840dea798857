//! Upstream link manager
//!
//! One call to [`establish`] produces one link generation: a dialed transport,
//! wrapped in the idle-timeout decorator, split into a framed write half for the
//! controller and a framed read half for the copy loop. The halves share a
//! cancellation token and the write half's slot, so whichever side tears the
//! link down releases the whole transport.

use crate::error::LinkError;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use packetforward_proto::{ClientId, FrameCodec, MAX_IP_PACKET_SIZE};
use packetforward_transport::{Dialer, IdleTimeout};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

type Writer<C> = FramedWrite<WriteHalf<IdleTimeout<C>>, FrameCodec>;

/// Emptied by whichever half closes the link first
type WriterSlot<C> = Arc<Mutex<Option<Writer<C>>>>;

/// Write half of a link, owned by the controller
pub struct UpstreamLink<C> {
    generation: u64,
    writer: WriterSlot<C>,
    cancel: CancellationToken,
}

/// Read half of a link, owned by that generation's copy loop
pub struct DownstreamLink<C> {
    generation: u64,
    reader: FramedRead<ReadHalf<IdleTimeout<C>>, FrameCodec>,
    writer: WriterSlot<C>,
    cancel: CancellationToken,
}

/// Dial, frame and identify one new link.
///
/// The dial is bounded by `idle_timeout`. The link's token is a child of `parent`,
/// so cancelling the client's shutdown token also tears the link down.
pub async fn establish<D: Dialer>(
    dialer: &D,
    id: &ClientId,
    idle_timeout: Duration,
    generation: u64,
    parent: &CancellationToken,
) -> Result<(UpstreamLink<D::Conn>, DownstreamLink<D::Conn>), LinkError> {
    let deadline = Instant::now() + idle_timeout;
    let conn = match timeout_at(deadline, dialer.dial(deadline)).await {
        Ok(result) => result?,
        Err(_) => return Err(LinkError::DialTimedOut(idle_timeout)),
    };

    let conn = IdleTimeout::new(conn, idle_timeout);
    let (read_half, write_half) = tokio::io::split(conn);

    let mut writer = FramedWrite::new(write_half, FrameCodec::big());
    let reader = FramedRead::with_capacity(read_half, FrameCodec::big(), MAX_IP_PACKET_SIZE);

    writer
        .send(id.to_frame())
        .await
        .map_err(LinkError::HandshakeFailed)?;

    debug!(generation, "Sent client ID to upstream");

    let cancel = parent.child_token();
    let writer = Arc::new(Mutex::new(Some(writer)));
    Ok((
        UpstreamLink {
            generation,
            writer: writer.clone(),
            cancel: cancel.clone(),
        },
        DownstreamLink {
            generation,
            reader,
            writer,
            cancel,
        },
    ))
}

impl<C: AsyncRead + AsyncWrite + Unpin> UpstreamLink<C> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True once either half has torn the link down
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Frame and flush one packet
    pub async fn send(&mut self, packet: Bytes) -> Result<(), LinkError> {
        if self.cancel.is_cancelled() {
            return Err(LinkError::LinkClosed);
        }

        trace!(generation = self.generation, len = packet.len(), "Writing packet upstream");

        let mut slot = self.writer.lock().await;
        let Some(writer) = slot.as_mut() else {
            return Err(LinkError::LinkClosed);
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(LinkError::LinkClosed),
            result = writer.send(packet) => result.map_err(LinkError::WriteFailed),
        }
    }

    /// Tear down the whole link; the copy loop notices through the shared token
    /// and releases the read half.
    pub fn close(self) {
        self.cancel.cancel();
        // A busy slot means the copy loop is already releasing the writer
        if let Ok(mut slot) = self.writer.try_lock() {
            slot.take();
        }
    }
}

impl<C: AsyncRead + AsyncWrite + Unpin> DownstreamLink<C> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Next frame from the relay, or the reason the link is finished
    pub async fn next_frame(&mut self) -> Result<BytesMut, LinkError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(LinkError::LinkClosed),
            frame = self.reader.next() => match frame {
                Some(Ok(frame)) => Ok(frame),
                Some(Err(e)) => Err(LinkError::ReadFailed(e)),
                None => Err(LinkError::ReadFailed(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "upstream closed the connection",
                ))),
            },
        }
    }

    /// Tear down the whole link and release the transport.
    ///
    /// Cancelling first makes any in-flight send give up the write half.
    pub async fn close(self) {
        self.cancel.cancel();
        let writer = self.writer.lock().await.take();
        drop(writer);
        trace!(generation = self.generation, "Released upstream transport");
    }
}
