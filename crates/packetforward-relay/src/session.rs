//! Client sessions
//!
//! A session outlives the connections that carry it. Each new connection with the
//! same identity replaces the previous attachment; the old connection may linger
//! until it fails, but replies always use the newest one.

use crate::error::RelayError;
use bytes::Bytes;
use packetforward_proto::ClientId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::debug;

/// Handle to one client's session, cheap to clone
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    id: ClientId,
    connections: AtomicU64,
    packets_received: AtomicU64,
    packets_sent: AtomicU64,
    state: RwLock<Attachment>,
}

#[derive(Debug)]
struct Attachment {
    /// Connection number and reply queue of the current connection
    current: Option<(u64, mpsc::Sender<Bytes>)>,
    detached_since: Option<Instant>,
}

impl Session {
    fn new(id: ClientId) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                connections: AtomicU64::new(0),
                packets_received: AtomicU64::new(0),
                packets_sent: AtomicU64::new(0),
                state: RwLock::new(Attachment {
                    current: None,
                    detached_since: Some(Instant::now()),
                }),
            }),
        }
    }

    pub fn id(&self) -> ClientId {
        self.inner.id
    }

    /// Number of connections that have carried this session so far
    pub fn connections(&self) -> u64 {
        self.inner.connections.load(Ordering::Relaxed)
    }

    pub fn packets_received(&self) -> u64 {
        self.inner.packets_received.load(Ordering::Relaxed)
    }

    pub fn packets_sent(&self) -> u64 {
        self.inner.packets_sent.load(Ordering::Relaxed)
    }

    pub async fn is_attached(&self) -> bool {
        self.inner.state.read().await.current.is_some()
    }

    /// Queue a packet for the client on its current connection
    pub async fn reply(&self, packet: Bytes) -> Result<(), RelayError> {
        let tx = self
            .inner
            .state
            .read()
            .await
            .current
            .as_ref()
            .map(|(_, tx)| tx.clone())
            .ok_or(RelayError::ConnectionClosed)?;

        tx.send(packet)
            .await
            .map_err(|_| RelayError::ConnectionClosed)?;
        self.inner.packets_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Make `tx` the reply path; returns the new connection's number
    pub(crate) async fn attach(&self, tx: mpsc::Sender<Bytes>) -> u64 {
        let connection = self.inner.connections.fetch_add(1, Ordering::Relaxed) + 1;
        let mut state = self.inner.state.write().await;
        state.current = Some((connection, tx));
        state.detached_since = None;
        connection
    }

    /// Drop the reply path, unless a newer connection has taken over
    pub(crate) async fn detach(&self, connection: u64) {
        let mut state = self.inner.state.write().await;
        if matches!(state.current, Some((current, _)) if current == connection) {
            state.current = None;
            state.detached_since = Some(Instant::now());
        }
    }

    pub(crate) fn record_received(&self) {
        self.inner.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    async fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.inner
            .state
            .read()
            .await
            .detached_since
            .map(|since| now.saturating_duration_since(since))
    }
}

/// All sessions known to a relay, keyed by client identity
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ClientId, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new connection to `id`'s session, creating it if needed.
    ///
    /// Runs under the registry lock so a concurrent eviction cannot drop the
    /// session between lookup and attach.
    pub(crate) async fn attach(&self, id: ClientId, tx: mpsc::Sender<Bytes>) -> (Session, u64) {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(id)
            .or_insert_with(|| Session::new(id))
            .clone();
        let connection = session.attach(tx).await;
        (session, connection)
    }

    pub async fn get(&self, id: &ClientId) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Forget sessions that have had no connection for longer than `max_idle`.
    /// Returns how many were removed.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        let mut expired = Vec::new();
        for (id, session) in sessions.iter() {
            if matches!(session.idle_for(now).await, Some(idle) if idle >= max_idle) {
                expired.push(*id);
            }
        }
        for id in &expired {
            debug!(client_id = %id, "Evicting idle session");
            sessions.remove(id);
        }
        expired.len()
    }
}
