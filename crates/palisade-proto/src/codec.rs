//! Packet trait and field codecs.
//!
//! Game packet bodies are plain big-endian binary with no framing of their
//! own: a parser must consume exactly its body and leave anything after it
//! (the next packet in the batch, or the terminator) untouched in `src`.
//!
//! # Invariants
//!
//! - Every reader checks `remaining()` before touching the buffer, so a
//!   short body yields `ProtocolError::Truncated` and never panics.
//! - Strings are `u8` length + UTF-8. Blobs are `u16` length + bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    ClientContext, Opcode,
    errors::{ProtocolError, Result},
};

/// A typed game packet with a fixed opcode.
pub trait Packet: Sized {
    /// Opcode written before the body
    const OPCODE: Opcode;

    /// Append the body (without opcode) to `dst`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FieldTooLong` if a field exceeds its length prefix
    fn build(&self, ctx: &ClientContext, dst: &mut BytesMut) -> Result<()>;

    /// Parse the body (opcode already consumed) from the front of `src`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Truncated` if `src` ends inside the body
    /// - `ProtocolError::InvalidUtf8` / `InvalidValue` for malformed fields
    fn parse(src: &mut Bytes, ctx: &ClientContext) -> Result<Self>;

    /// Opcode followed by body. No terminator.
    ///
    /// # Errors
    ///
    /// Same as [`Packet::build`].
    fn to_bytes(&self, ctx: &ClientContext) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(32);
        encode_packet(self, ctx, &mut dst)?;
        Ok(dst.freeze())
    }
}

/// Append `packet` (opcode + body) to `dst`.
///
/// On error `dst` is left as it was.
///
/// # Errors
///
/// Same as [`Packet::build`].
pub fn encode_packet<P: Packet>(packet: &P, ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
    let start = dst.len();
    dst.put_u16(P::OPCODE.to_u16());
    if let Err(e) = packet.build(ctx, dst) {
        dst.truncate(start);
        return Err(e);
    }
    Ok(())
}

fn ensure(src: &Bytes, needed: usize, field: &'static str) -> Result<()> {
    if src.remaining() < needed {
        return Err(ProtocolError::Truncated { field, needed, remaining: src.remaining() });
    }
    Ok(())
}

pub(crate) fn get_u8(src: &mut Bytes, field: &'static str) -> Result<u8> {
    ensure(src, 1, field)?;
    Ok(src.get_u8())
}

pub(crate) fn get_u16(src: &mut Bytes, field: &'static str) -> Result<u16> {
    ensure(src, 2, field)?;
    Ok(src.get_u16())
}

pub(crate) fn get_u32(src: &mut Bytes, field: &'static str) -> Result<u32> {
    ensure(src, 4, field)?;
    Ok(src.get_u32())
}

pub(crate) fn get_f32(src: &mut Bytes, field: &'static str) -> Result<f32> {
    ensure(src, 4, field)?;
    Ok(src.get_f32())
}

pub(crate) fn get_bytes(src: &mut Bytes, len: usize, field: &'static str) -> Result<Bytes> {
    ensure(src, len, field)?;
    Ok(src.split_to(len))
}

pub(crate) fn get_string(src: &mut Bytes, field: &'static str) -> Result<String> {
    let len = get_u8(src, field)? as usize;
    let raw = get_bytes(src, len, field)?;
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8 { field })
}

/// Fixed-width NUL-padded string (legacy clients).
pub(crate) fn get_fixed_string(src: &mut Bytes, width: usize, field: &'static str) -> Result<String> {
    let raw = get_bytes(src, width, field)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8(raw[..end].to_vec()).map_err(|_| ProtocolError::InvalidUtf8 { field })
}

pub(crate) fn get_blob(src: &mut Bytes, field: &'static str) -> Result<Bytes> {
    let len = get_u16(src, field)? as usize;
    get_bytes(src, len, field)
}

pub(crate) fn put_string(dst: &mut BytesMut, value: &str, field: &'static str) -> Result<()> {
    let len = u8::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLong {
        field,
        len: value.len(),
        max: u8::MAX as usize,
    })?;
    dst.put_u8(len);
    dst.put_slice(value.as_bytes());
    Ok(())
}

/// Write `value` into a `width`-byte NUL-padded field.
///
/// Longer values are cut at the last char boundary that leaves room for at
/// least one NUL.
pub(crate) fn put_fixed_string(dst: &mut BytesMut, value: &str, width: usize) {
    let mut end = value.len().min(width.saturating_sub(1));
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    dst.put_slice(&value.as_bytes()[..end]);
    dst.put_bytes(0, width - end);
}

pub(crate) fn put_blob(dst: &mut BytesMut, value: &[u8], field: &'static str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLong {
        field,
        len: value.len(),
        max: u16::MAX as usize,
    })?;
    dst.put_u16(len);
    dst.put_slice(value);
    Ok(())
}
