//! Palisade wire protocol.
//!
//! Two layers live on the wire:
//!
//! - The transport layer: a 12-byte raw binary [`TransportHeader`] followed by
//!   an encrypted body (see `palisade-crypto`).
//! - The game layer inside the decrypted body: one or more packets, each a
//!   2-byte big-endian [`Opcode`] followed by an opcode-specific body, closed
//!   by the [`FRAME_TERMINATOR`] (which is the `End` opcode).
//!
//! Every message type implements [`Packet`], which carries its opcode and
//! knows how to build and parse its body. Bodies may differ between protocol
//! versions, so both directions take a [`ClientContext`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod errors;
mod header;
mod opcode;
pub mod packets;

pub use codec::{Packet, encode_packet};
pub use errors::{ProtocolError, Result};
pub use header::TransportHeader;
pub use opcode::Opcode;

/// Bytes appended to every outbound queue item.
///
/// Identical to the big-endian `End` opcode, so a receiver walking a batch
/// stops cleanly when it reaches it.
pub const FRAME_TERMINATOR: [u8; 2] = [0x00, 0x10];

/// Client protocol revisions the server can encode for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolVersion {
    /// Original client: fixed-width names
    Legacy,
    /// Current client: length-prefixed names
    #[default]
    Current,
}

impl ProtocolVersion {
    /// Parse the version byte sent at login. Unknown values map to `Current`.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::Legacy,
            _ => Self::Current,
        }
    }

    /// Version byte as sent at login.
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Legacy => 1,
            Self::Current => 2,
        }
    }
}

/// Per-connection encoding context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientContext {
    /// Protocol revision of the peer
    pub version: ProtocolVersion,
}

impl ClientContext {
    /// Context for a peer speaking `version`.
    pub fn new(version: ProtocolVersion) -> Self {
        Self { version }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminator_is_end_opcode() {
        assert_eq!(u16::from_be_bytes(FRAME_TERMINATOR), Opcode::End.to_u16());
    }

    #[test]
    fn version_byte_round_trip() {
        for version in [ProtocolVersion::Legacy, ProtocolVersion::Current] {
            assert_eq!(ProtocolVersion::from_byte(version.to_byte()), version);
        }
        assert_eq!(ProtocolVersion::from_byte(0xEE), ProtocolVersion::Current);
    }
}
