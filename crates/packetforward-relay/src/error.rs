//! Relay errors

use packetforward_proto::ProtoError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Client did not identify itself within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Invalid client identity: {0}")]
    InvalidIdentity(#[from] ProtoError),

    #[error("Connection closed")]
    ConnectionClosed,
}
