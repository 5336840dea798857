//! Idle-timeout decorator for transports
//!
//! Wraps a byte stream and fails it once no bytes have moved in either direction
//! for the configured period. Any successful read or write pushes the deadline out.
//!
//! Only `poll_read` registers interest in the timer. The read side of a link is
//! always parked on the transport, so it is the one that notices expiry; the write
//! side just checks the deadline before touching the inner stream.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep_until, Instant, Sleep};
use tracing::debug;

/// Byte stream that errors with `TimedOut` after a period of inactivity
#[derive(Debug)]
pub struct IdleTimeout<T> {
    inner: T,
    timeout: Duration,
    deadline: Pin<Box<Sleep>>,
    expired: bool,
}

impl<T> IdleTimeout<T> {
    pub fn new(inner: T, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            deadline: Box::pin(sleep_until(Instant::now() + timeout)),
            expired: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn touch(&mut self) {
        self.deadline.as_mut().reset(Instant::now() + self.timeout);
    }

    fn idle_error(&mut self) -> io::Error {
        if !self.expired {
            debug!(timeout = ?self.timeout, "Connection idle, closing");
            self.expired = true;
        }
        io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connection idle for {:?}", self.timeout),
        )
    }

    fn past_deadline(&self) -> bool {
        self.expired || Instant::now() >= self.deadline.deadline()
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for IdleTimeout<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.expired {
            return Poll::Ready(Err(this.idle_error()));
        }

        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                if buf.filled().len() > before {
                    this.touch();
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => match this.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => Poll::Ready(Err(this.idle_error())),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for IdleTimeout<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.past_deadline() {
            return Poll::Ready(Err(this.idle_error()));
        }

        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                if n > 0 {
                    this.touch();
                }
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test(start_paused = true)]
    async fn test_read_times_out_when_idle() {
        let (client, _server) = tokio::io::duplex(64);
        let mut conn = IdleTimeout::new(client, Duration::from_secs(10));

        let start = Instant::now();
        let mut buf = [0u8; 8];
        let err = conn.read(&mut buf).await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_secs(10));

        // Stays failed once expired
        let err = conn.write(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_extends_deadline() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut conn = IdleTimeout::new(client, Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(6)).await;
        conn.write_all(b"ping").await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        server.write_all(b"pong").await.unwrap();

        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        // Deadline now sits 10s after the read
        let start = Instant::now();
        let err = conn.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_passes_data_through() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut conn = IdleTimeout::new(client, Duration::from_secs(30));

        conn.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        drop(server);
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }
}
