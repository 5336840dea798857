//! Client lifecycle state

use std::fmt;
use tokio::sync::watch;

/// Where the forwarding client is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Identity assigned, nothing dialed yet
    Uninitialized,
    /// Dial or handshake in flight
    Connecting,
    /// Link live and its copy loop running
    Connected { generation: u64 },
    /// Link torn down; the next write drains its copy loop and redials
    Reconnecting,
    /// Terminal
    Closed,
}

impl ClientState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ClientState::Connected { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ClientState::Closed)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientState::Uninitialized => write!(f, "uninitialized"),
            ClientState::Connecting => write!(f, "connecting"),
            ClientState::Connected { generation } => write!(f, "connected (link {})", generation),
            ClientState::Reconnecting => write!(f, "reconnecting"),
            ClientState::Closed => write!(f, "closed"),
        }
    }
}

/// Shared writer for the state channel
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<ClientState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(ClientState::Uninitialized);
        Self { tx }
    }

    pub(crate) fn get(&self) -> ClientState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.tx.subscribe()
    }

    /// Move to `next` unless the client is already closed
    pub(crate) fn set(&self, next: ClientState) {
        self.tx.send_if_modified(|state| {
            if state.is_closed() || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    /// Copy loop exit: only a link that is still the current one demotes the state
    pub(crate) fn link_lost(&self, generation: u64) {
        self.tx.send_if_modified(|state| {
            if *state == (ClientState::Connected { generation }) {
                *state = ClientState::Reconnecting;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn close(&self) {
        self.tx.send_replace(ClientState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_link_does_not_demote() {
        let cell = StateCell::new();
        cell.set(ClientState::Connected { generation: 2 });

        cell.link_lost(1);
        assert_eq!(cell.get(), ClientState::Connected { generation: 2 });

        cell.link_lost(2);
        assert_eq!(cell.get(), ClientState::Reconnecting);
    }

    #[test]
    fn test_closed_is_terminal() {
        let cell = StateCell::new();
        let rx = cell.subscribe();

        cell.close();
        cell.set(ClientState::Connecting);
        cell.link_lost(1);

        assert_eq!(*rx.borrow(), ClientState::Closed);
        assert!(cell.get().is_closed());
    }
}
