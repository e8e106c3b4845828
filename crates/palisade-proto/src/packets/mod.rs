//! Typed game packets.
//!
//! Requests are parsed by the server's handler table, one opcode at a time.
//! Packets the server sends are collected in [`Notification`] so a client can
//! walk a decrypted batch without knowing what it asked for.

pub mod ack;
pub mod cast;
pub mod object;
pub mod semaphore;
pub mod session;
pub mod stage;

use bytes::Bytes;

pub use self::{
    ack::{Ack, AckPayload},
    cast::{BroadcastType, CastBinary, CastedBinary},
    object::{
        CleanupObject, CreateObject, DeleteObject, DeleteUser, DuplicateObject, InsertUser, Position,
        PositionObject,
    },
    semaphore::{AcquireSemaphore, CheckSemaphore, CreateAcquireSemaphore, ReleaseSemaphore},
    session::{IssueLogkey, Login, Logout, Nop, Ping},
    stage::{
        BackStage, CreateStage, EnterStage, GetStageBinary, LockStage, MoveStage, ReserveStage,
        SetStageBinary, SetStagePass, StageBinaryKey, UnlockStage, UnreserveStage, WaitStageBinary,
    },
};
use crate::{
    ClientContext, Opcode, Packet,
    codec::get_u16,
    errors::{ProtocolError, Result},
};

/// A packet sent from server to client.
///
/// # Invariants
///
/// Each variant corresponds to exactly one opcode; `decode_next` and
/// `opcode` match exhaustively so a new variant cannot be half-wired.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Request acknowledgement
    Ack(Ack),
    /// Clear local world
    CleanupObject(CleanupObject),
    /// Object replicated
    DuplicateObject(DuplicateObject),
    /// Object moved
    PositionObject(PositionObject),
    /// Object removed
    DeleteObject(DeleteObject),
    /// Player replicated
    InsertUser(InsertUser),
    /// Player removed
    DeleteUser(DeleteUser),
    /// Relayed message
    CastedBinary(CastedBinary),
}

impl Notification {
    /// Opcode of this notification.
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Ack(_) => Ack::OPCODE,
            Self::CleanupObject(_) => CleanupObject::OPCODE,
            Self::DuplicateObject(_) => DuplicateObject::OPCODE,
            Self::PositionObject(_) => PositionObject::OPCODE,
            Self::DeleteObject(_) => DeleteObject::OPCODE,
            Self::InsertUser(_) => InsertUser::OPCODE,
            Self::DeleteUser(_) => DeleteUser::OPCODE,
            Self::CastedBinary(_) => CastedBinary::OPCODE,
        }
    }

    /// Decode the next packet from a batch.
    ///
    /// Returns `Ok(None)` when `src` is empty or the next opcode is the
    /// terminator (which is consumed).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` for opcodes a server never sends
    /// - Any body parse error
    pub fn decode_next(src: &mut Bytes, ctx: &ClientContext) -> Result<Option<Self>> {
        if src.is_empty() {
            return Ok(None);
        }

        let raw = get_u16(src, "opcode")?;
        let notification = match Opcode::from_u16(raw) {
            Some(Opcode::End) => return Ok(None),
            Some(Opcode::Ack) => Self::Ack(Ack::parse(src, ctx)?),
            Some(Opcode::CleanupObject) => Self::CleanupObject(CleanupObject::parse(src, ctx)?),
            Some(Opcode::DuplicateObject) => Self::DuplicateObject(DuplicateObject::parse(src, ctx)?),
            Some(Opcode::PositionObject) => Self::PositionObject(PositionObject::parse(src, ctx)?),
            Some(Opcode::DeleteObject) => Self::DeleteObject(DeleteObject::parse(src, ctx)?),
            Some(Opcode::InsertUser) => Self::InsertUser(InsertUser::parse(src, ctx)?),
            Some(Opcode::DeleteUser) => Self::DeleteUser(DeleteUser::parse(src, ctx)?),
            Some(Opcode::CastedBinary) => Self::CastedBinary(CastedBinary::parse(src, ctx)?),
            _ => return Err(ProtocolError::UnknownOpcode(raw)),
        };

        Ok(Some(notification))
    }

    /// Decode every packet in one terminated queue item.
    ///
    /// # Errors
    ///
    /// Same as [`Notification::decode_next`].
    pub fn decode_all(mut src: Bytes, ctx: &ClientContext) -> Result<Vec<Self>> {
        let mut out = Vec::new();
        while let Some(notification) = Self::decode_next(&mut src, ctx)? {
            out.push(notification);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::{FRAME_TERMINATOR, encode_packet};

    #[test]
    fn batch_stops_at_terminator() {
        let ctx = ClientContext::default();
        let mut buf = BytesMut::new();
        encode_packet(&CleanupObject, &ctx, &mut buf).unwrap();
        encode_packet(&DeleteUser { player_id: 3 }, &ctx, &mut buf).unwrap();
        buf.put_slice(&FRAME_TERMINATOR);
        buf.put_slice(b"ignored");

        let mut src = buf.freeze();
        assert_eq!(
            Notification::decode_next(&mut src, &ctx).unwrap(),
            Some(Notification::CleanupObject(CleanupObject))
        );
        assert_eq!(
            Notification::decode_next(&mut src, &ctx).unwrap(),
            Some(Notification::DeleteUser(DeleteUser { player_id: 3 }))
        );
        assert_eq!(Notification::decode_next(&mut src, &ctx).unwrap(), None);
        assert_eq!(&src[..], b"ignored");
    }

    #[test]
    fn request_opcodes_are_not_notifications() {
        let mut src = Bytes::from_static(&[0x00, 0x24, 0, 0, 0, 1]);
        let err = Notification::decode_next(&mut src, &ClientContext::default()).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownOpcode(0x0024));
    }

    #[test]
    fn opcode_matches_variant() {
        let n = Notification::Ack(Ack { handle: 1, payload: AckPayload::ok_simple([0; 4]) });
        assert_eq!(n.opcode(), Opcode::Ack);
    }
}
