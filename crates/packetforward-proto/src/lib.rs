//! Packetforward wire protocol
//!
//! Every connection between a forwarding client and a relay carries a sequence of
//! length-prefixed frames. The first frame on a connection is the client's identity;
//! every frame after that is one opaque IP packet.

pub mod codec;
pub mod identity;

pub use codec::FrameCodec;
pub use identity::{ClientId, ProtoError};

/// Largest IP packet the protocol carries (and the size of the receive buffer)
pub const MAX_IP_PACKET_SIZE: usize = 65535;

/// Largest payload of a frame when big frames are disabled
pub const MAX_SMALL_FRAME_LENGTH: usize = u16::MAX as usize;

/// Largest payload of a frame when big frames are enabled
pub const MAX_BIG_FRAME_LENGTH: usize = u32::MAX as usize;
