//! Length-prefixed frame codec
//!
//! Format: `[length: u16 or u32, little endian][payload]`
//!
//! The short header is the default. Big-frame mode widens the header to four bytes
//! so a frame can exceed 64 KiB; both ends of a connection must agree on the mode.

use crate::{MAX_BIG_FRAME_LENGTH, MAX_IP_PACKET_SIZE, MAX_SMALL_FRAME_LENGTH};
use bytes::{Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Frame codec shared by the forwarding client and the relay
#[derive(Debug, Clone)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
    big_frames: bool,
    max_frame_length: usize,
}

impl FrameCodec {
    /// Short-header codec accepting frames up to 64 KiB
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Big-frame codec limited to the largest IP packet, as used on every link
    pub fn big() -> Self {
        Self::builder()
            .big_frames(true)
            .max_frame_length(MAX_IP_PACKET_SIZE)
            .build()
    }

    pub fn builder() -> FrameCodecBuilder {
        FrameCodecBuilder::default()
    }

    /// Size of the length prefix in bytes
    pub fn header_len(&self) -> usize {
        if self.big_frames {
            4
        } else {
            2
        }
    }

    pub fn is_big(&self) -> bool {
        self.big_frames
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, io::Error> {
        self.inner.decode(src)
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), io::Error> {
        self.inner.encode(payload, dst)
    }
}

/// Builder for FrameCodec
#[derive(Debug, Default)]
pub struct FrameCodecBuilder {
    big_frames: bool,
    max_frame_length: Option<usize>,
}

impl FrameCodecBuilder {
    /// Use a four byte length prefix instead of two
    pub fn big_frames(mut self, enabled: bool) -> Self {
        self.big_frames = enabled;
        self
    }

    /// Reject frames larger than `len` (clamped to what the header can express)
    pub fn max_frame_length(mut self, len: usize) -> Self {
        self.max_frame_length = Some(len);
        self
    }

    pub fn build(self) -> FrameCodec {
        let (header_len, limit) = if self.big_frames {
            (4, MAX_BIG_FRAME_LENGTH)
        } else {
            (2, MAX_SMALL_FRAME_LENGTH)
        };
        let max_frame_length = self.max_frame_length.unwrap_or(limit).min(limit);

        let inner = LengthDelimitedCodec::builder()
            .little_endian()
            .length_field_length(header_len)
            .max_frame_length(max_frame_length)
            .new_codec();

        FrameCodec {
            inner,
            big_frames: self.big_frames,
            max_frame_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::Framed;

    fn encode(codec: &mut FrameCodec, payload: &'static [u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        codec
            .encode(Bytes::from_static(payload), &mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn test_small_frame_header() {
        let mut codec = FrameCodec::new();
        let buf = encode(&mut codec, &[0x01, 0x02, 0x03]);

        assert_eq!(codec.header_len(), 2);
        assert_eq!(&buf[..], &[0x03, 0x00, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_big_frame_header() {
        let mut codec = FrameCodec::big();
        let buf = encode(&mut codec, &[0x01, 0x02, 0x03]);

        assert!(codec.is_big());
        assert_eq!(codec.max_frame_length(), MAX_IP_PACKET_SIZE);
        assert_eq!(&buf[..], &[0x03, 0x00, 0x00, 0x00, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_decode_incomplete() {
        let mut codec = FrameCodec::big();
        let encoded = encode(&mut codec, b"packet");

        // Only provide the length header
        let mut buf = BytesMut::from(&encoded[..4]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        // Provide the rest of the frame
        buf.extend_from_slice(&encoded[4..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], b"packet");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_multiple() {
        let mut codec = FrameCodec::big();
        let mut buf = encode(&mut codec, b"first");
        buf.extend_from_slice(&encode(&mut codec, b"second"));

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"first");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"second");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = FrameCodec::builder()
            .big_frames(true)
            .max_frame_length(8)
            .build();

        let mut dst = BytesMut::new();
        let err = codec
            .encode(Bytes::from_static(&[0u8; 9]), &mut dst)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        // Header announcing 9 bytes
        let mut src = BytesMut::from(&[0x09, 0x00, 0x00, 0x00][..]);
        assert!(codec.decode(&mut src).is_err());
    }

    #[test]
    fn test_small_frame_limit_clamped() {
        let codec = FrameCodec::builder().max_frame_length(1 << 20).build();
        assert_eq!(codec.max_frame_length(), MAX_SMALL_FRAME_LENGTH);
    }

    #[tokio::test]
    async fn test_framed_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let mut client = Framed::new(client, FrameCodec::big());
        let mut server = Framed::new(server, FrameCodec::big());

        client.send(Bytes::from_static(b"ping")).await.unwrap();
        client.send(Bytes::new()).await.unwrap();

        assert_eq!(&server.next().await.unwrap().unwrap()[..], b"ping");
        assert!(server.next().await.unwrap().unwrap().is_empty());
    }
}
