//! Packetforward client library - Public API
//!
//! Forwards IP packets to a relay over a single reconnecting stream. Writes block
//! until the packet is flushed, redialing as often as needed; packets coming back
//! from the relay are handed to a [`PacketSink`] by a background copy loop.

pub mod backoff;
pub mod client;
pub mod completion;
pub mod config;
mod downstream;
pub mod error;
pub mod link;
pub mod sink;
pub mod state;
pub mod stats;

pub use backoff::Backoff;
pub use client::ForwardingClient;
pub use config::{ClientConfig, ClientConfigBuilder, BASE_RETRY_DELAY, DEFAULT_IDLE_TIMEOUT};
pub use error::{ClientError, LinkError, SinkError};
pub use sink::PacketSink;
pub use state::ClientState;
pub use stats::StatsSnapshot;

pub use packetforward_proto::{ClientId, MAX_IP_PACKET_SIZE};
pub use packetforward_transport::{Dialer, TcpDialer};
