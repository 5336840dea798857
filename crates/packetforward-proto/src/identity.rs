//! Client identity sent as the first frame of every connection

use bytes::Bytes;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Invalid client identity: {0}")]
    InvalidIdentity(String),
}

/// Random per-client token that lets a relay recognize a reconnecting client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generate a fresh random identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Handshake frame payload: the hyphenated UUID as ASCII
    pub fn to_frame(&self) -> Bytes {
        Bytes::from(self.0.hyphenated().to_string())
    }

    /// Parse a handshake frame payload
    pub fn from_frame(payload: &[u8]) -> Result<Self, ProtoError> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| ProtoError::InvalidIdentity("not valid UTF-8".to_string()))?;

        Uuid::parse_str(text)
            .map(Self)
            .map_err(|e| ProtoError::InvalidIdentity(e.to_string()))
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identities_are_unique() {
        assert_ne!(ClientId::new(), ClientId::new());
    }

    #[test]
    fn test_frame_is_hyphenated_uuid() {
        let id = ClientId::new();
        let frame = id.to_frame();

        assert_eq!(frame.len(), 36);
        assert_eq!(&frame[..], id.to_string().as_bytes());
        assert_eq!(ClientId::from_frame(&frame).unwrap(), id);
    }

    #[test]
    fn test_invalid_identity_rejected() {
        assert!(matches!(
            ClientId::from_frame(b"not-a-uuid"),
            Err(ProtoError::InvalidIdentity(_))
        ));
        assert!(ClientId::from_frame(&[0xff, 0xfe]).is_err());
    }
}
