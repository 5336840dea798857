//! Packetforward relay
//!
//! The far end of a forwarding client's link. Accepts framed connections, reads
//! the identity frame, attaches the connection to that client's session and hands
//! every following packet to a [`PacketHandler`]. Replies go back over whichever
//! connection the session is currently attached to, so a client that reconnects
//! keeps its session.
//!
//! No NAT is performed here. [`EchoHandler`] simply sends packets back.

pub mod config;
pub mod error;
pub mod handler;
pub mod server;
pub mod session;

pub use config::{RelayConfig, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_LISTEN_ADDR, DEFAULT_SESSION_IDLE_TIMEOUT};
pub use error::RelayError;
pub use handler::{EchoHandler, PacketHandler};
pub use server::RelayServer;
pub use session::{Session, SessionRegistry};
