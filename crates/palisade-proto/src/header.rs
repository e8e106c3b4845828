//! Transport header with zero-copy parsing.
//!
//! The `TransportHeader` is a fixed 12-byte structure serialized as raw
//! binary (Big Endian). It precedes every encrypted body on the stream and
//! is the only part of a frame readable before decryption.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Fixed 12-byte transport header (Big Endian network byte order)
///
/// Fields are stored as raw byte arrays so every 12-byte pattern is a valid
/// value and the struct can be cast straight from untrusted network bytes.
///
/// # Security
///
/// `payload_size` is validated against [`TransportHeader::MAX_PAYLOAD_SIZE`]
/// before the reader allocates anything for the body. `packet_num` is not
/// trusted here; the cipher checks it for replay when opening the body.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct TransportHeader {
    payload_size: [u8; 4], // u32 ciphertext length
    packet_num: [u8; 8],   // u64 per-direction sequence number
}

impl TransportHeader {
    /// Size of the serialized header (12 bytes)
    pub const SIZE: usize = 12;

    /// Maximum encrypted body size (1 MiB)
    pub const MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;

    /// Create a header for a body of `payload_size` bytes.
    #[must_use]
    pub fn new(payload_size: u32, packet_num: u64) -> Self {
        Self { payload_size: payload_size.to_be_bytes(), packet_num: packet_num.to_be_bytes() }
    }

    /// Parse a header from network bytes (zero-copy).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if fewer than 12 bytes are given
    /// - `ProtocolError::PayloadTooLarge` if the claimed body exceeds the limit
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        let payload_size = header.payload_size();
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Encrypted body length.
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }

    /// Sender's packet number for this frame.
    #[must_use]
    pub fn packet_num(&self) -> u64 {
        u64::from_be_bytes(self.packet_num)
    }
}

impl std::fmt::Debug for TransportHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHeader")
            .field("payload_size", &self.payload_size())
            .field("packet_num", &self.packet_num())
            .finish()
    }
}
