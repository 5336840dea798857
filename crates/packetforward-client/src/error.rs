//! Error types

use packetforward_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Errors returned to callers of the forwarding client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Client closed")]
    Closed,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Failures of a single link generation.
///
/// None of these reach the caller. Each one tears the link down and the next
/// write redials, so from the caller's side they only show up as latency.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Error dialing upstream, will retry: {0}")]
    DialFailed(#[from] TransportError),

    #[error("Dialing upstream timed out after {0:?}, will retry")]
    DialTimedOut(Duration),

    #[error("Error sending client ID to upstream, will retry: {0}")]
    HandshakeFailed(#[source] std::io::Error),

    #[error("Error writing to upstream: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("Error reading from upstream: {0}")]
    ReadFailed(#[source] std::io::Error),

    #[error("Error delivering to downstream: {0}")]
    SinkDeliveryFailed(#[source] SinkError),

    #[error("Link closed")]
    LinkClosed,
}

/// Errors reported by a packet sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink closed")]
    Closed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
