//! Generic acknowledgement frame.
//!
//! Layout after the `Ack` opcode:
//!
//! ```text
//! [handle u32][is_buffer u8][error u8][data]
//! ```
//!
//! Buffer data is a `u16` length followed by the bytes. Lengths of `0xFFFF`
//! and above are written as the `0xFFFF` escape followed by a `u32` length.
//! Simple data is exactly 4 bytes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    ClientContext, Opcode, Packet,
    codec::{get_bytes, get_u8, get_u16, get_u32},
    errors::{ProtocolError, Result},
};

const EXTENDED_LENGTH: u16 = 0xFFFF;

/// Result body of an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckPayload {
    /// Variable-length result
    Buffer {
        /// Whether the request succeeded
        ok: bool,
        /// Result bytes
        data: Bytes,
    },
    /// Fixed 4-byte result
    Simple {
        /// Whether the request succeeded
        ok: bool,
        /// Result bytes
        data: [u8; 4],
    },
}

impl AckPayload {
    /// Successful buffer result.
    pub fn ok_buffer(data: impl Into<Bytes>) -> Self {
        Self::Buffer { ok: true, data: data.into() }
    }

    /// Failed buffer result with no data.
    #[must_use]
    pub fn fail_buffer() -> Self {
        Self::Buffer { ok: false, data: Bytes::new() }
    }

    /// Successful simple result.
    #[must_use]
    pub fn ok_simple(data: [u8; 4]) -> Self {
        Self::Simple { ok: true, data }
    }

    /// Failed simple result with zeroed data.
    #[must_use]
    pub fn fail_simple() -> Self {
        Self::Simple { ok: false, data: [0; 4] }
    }

    /// Whether the request succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        match self {
            Self::Buffer { ok, .. } | Self::Simple { ok, .. } => *ok,
        }
    }

    /// Result bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        match self {
            Self::Buffer { data, .. } => data,
            Self::Simple { data, .. } => data,
        }
    }
}

/// Acknowledgement correlated to a request by its handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Handle copied from the request
    pub handle: u32,
    /// Result
    pub payload: AckPayload,
}

impl Packet for Ack {
    const OPCODE: Opcode = Opcode::Ack;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.handle);
        match &self.payload {
            AckPayload::Buffer { ok, data } => {
                dst.put_u8(1);
                dst.put_u8(u8::from(!ok));
                match u16::try_from(data.len()) {
                    Ok(len) if len < EXTENDED_LENGTH => dst.put_u16(len),
                    _ => {
                        let len = u32::try_from(data.len()).map_err(|_| {
                            ProtocolError::FieldTooLong {
                                field: "ack_data",
                                len: data.len(),
                                max: u32::MAX as usize,
                            }
                        })?;
                        dst.put_u16(EXTENDED_LENGTH);
                        dst.put_u32(len);
                    },
                }
                dst.put_slice(data);
            },
            AckPayload::Simple { ok, data } => {
                dst.put_u8(0);
                dst.put_u8(u8::from(!ok));
                dst.put_slice(data);
            },
        }
        Ok(())
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        let handle = get_u32(src, "handle")?;
        let is_buffer = get_u8(src, "is_buffer")?;
        let ok = get_u8(src, "error")? == 0;

        let payload = match is_buffer {
            0 => {
                let raw = get_bytes(src, 4, "ack_data")?;
                let mut data = [0u8; 4];
                data.copy_from_slice(&raw);
                AckPayload::Simple { ok, data }
            },
            1 => {
                let mut len = get_u16(src, "ack_data")? as usize;
                if len == EXTENDED_LENGTH as usize {
                    len = get_u32(src, "ack_data")? as usize;
                }
                AckPayload::Buffer { ok, data: get_bytes(src, len, "ack_data")? }
            },
            other => {
                return Err(ProtocolError::InvalidValue { field: "is_buffer", value: u64::from(other) });
            },
        };

        Ok(Self { handle, payload })
    }
}
