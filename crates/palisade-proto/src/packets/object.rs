//! Object and user replication packets.
//!
//! `CreateObject` and `PositionObject` arrive from clients; the rest are
//! notices the server sends to keep each client's local world in step with
//! the stage. `PositionObject` travels both ways with the same body.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    ClientContext, Opcode, Packet, ProtocolVersion,
    codec::{get_f32, get_fixed_string, get_string, get_u32, put_fixed_string, put_string},
    errors::Result,
};

/// Width of the name field sent to legacy clients
pub const LEGACY_NAME_WIDTH: usize = 16;

/// World position of an object.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    /// X coordinate
    pub x: f32,
    /// Y coordinate
    pub y: f32,
    /// Z coordinate
    pub z: f32,
}

impl Position {
    /// Position at `(x, y, z)`.
    #[must_use]
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    fn put(self, dst: &mut BytesMut) {
        dst.put_f32(self.x);
        dst.put_f32(self.y);
        dst.put_f32(self.z);
    }

    fn get(src: &mut Bytes) -> Result<Self> {
        Ok(Self { x: get_f32(src, "x")?, y: get_f32(src, "y")?, z: get_f32(src, "z")? })
    }
}

/// Clear the client's local world before a stage transfer. Empty body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupObject;

impl Packet for CleanupObject {
    const OPCODE: Opcode = Opcode::CleanupObject;

    fn build(&self, _ctx: &ClientContext, _dst: &mut BytesMut) -> Result<()> {
        Ok(())
    }

    fn parse(_src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self)
    }
}

/// Place an object in the caller's current stage.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateObject {
    /// Correlation handle echoed in the ack
    pub ack_handle: u32,
    /// Initial position
    pub position: Position,
}

impl Packet for CreateObject {
    const OPCODE: Opcode = Opcode::CreateObject;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.ack_handle);
        self.position.put(dst);
        Ok(())
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self { ack_handle: get_u32(src, "ack_handle")?, position: Position::get(src)? })
    }
}

/// Replicate an object owned by another player.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateObject {
    /// Stage-local object id
    pub object_id: u32,
    /// Owning player
    pub owner_player_id: u32,
    /// Current position
    pub position: Position,
}

impl Packet for DuplicateObject {
    const OPCODE: Opcode = Opcode::DuplicateObject;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.object_id);
        dst.put_u32(self.owner_player_id);
        self.position.put(dst);
        Ok(())
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self {
            object_id: get_u32(src, "object_id")?,
            owner_player_id: get_u32(src, "owner_player_id")?,
            position: Position::get(src)?,
        })
    }
}

/// Move an object. Sent by the owner and relayed unchanged to the stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionObject {
    /// Stage-local object id
    pub object_id: u32,
    /// New position
    pub position: Position,
}

impl Packet for PositionObject {
    const OPCODE: Opcode = Opcode::PositionObject;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.object_id);
        self.position.put(dst);
        Ok(())
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self { object_id: get_u32(src, "object_id")?, position: Position::get(src)? })
    }
}

/// Remove an object from the client's world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteObject {
    /// Stage-local object id
    pub object_id: u32,
}

impl Packet for DeleteObject {
    const OPCODE: Opcode = Opcode::DeleteObject;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.object_id);
        Ok(())
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self { object_id: get_u32(src, "object_id")? })
    }
}

/// Replicate a player.
///
/// Legacy clients read the name from a fixed 16-byte NUL-padded field;
/// current clients read a length-prefixed string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertUser {
    /// Player id
    pub player_id: u32,
    /// Display name
    pub name: String,
}

impl Packet for InsertUser {
    const OPCODE: Opcode = Opcode::InsertUser;

    fn build(&self, ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.player_id);
        match ctx.version {
            ProtocolVersion::Legacy => {
                put_fixed_string(dst, &self.name, LEGACY_NAME_WIDTH);
                Ok(())
            },
            ProtocolVersion::Current => put_string(dst, &self.name, "name"),
        }
    }

    fn parse(src: &mut Bytes, ctx: &ClientContext) -> Result<Self> {
        let player_id = get_u32(src, "player_id")?;
        let name = match ctx.version {
            ProtocolVersion::Legacy => get_fixed_string(src, LEGACY_NAME_WIDTH, "name")?,
            ProtocolVersion::Current => get_string(src, "name")?,
        };
        Ok(Self { player_id, name })
    }
}

/// Remove a player from the client's world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteUser {
    /// Player id
    pub player_id: u32,
}

impl Packet for DeleteUser {
    const OPCODE: Opcode = Opcode::DeleteUser;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.player_id);
        Ok(())
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self { player_id: get_u32(src, "player_id")? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: ClientContext = ClientContext { version: ProtocolVersion::Legacy };
    const CURRENT: ClientContext = ClientContext { version: ProtocolVersion::Current };

    #[test]
    fn insert_user_encoding_depends_on_version() {
        let packet = InsertUser { player_id: 5, name: "Kira".into() };

        let legacy = packet.to_bytes(&LEGACY).unwrap();
        assert_eq!(legacy.len(), 2 + 4 + LEGACY_NAME_WIDTH);
        assert_eq!(&legacy[6..10], b"Kira");

        let current = packet.to_bytes(&CURRENT).unwrap();
        assert_eq!(&current[..], &[0x00, 0x35, 0, 0, 0, 5, 4, b'K', b'i', b'r', b'a']);
    }

    #[test]
    fn insert_user_legacy_parse() {
        let packet = InsertUser { player_id: 77, name: "Rook".into() };
        let mut body = packet.to_bytes(&LEGACY).unwrap().slice(2..);
        assert_eq!(InsertUser::parse(&mut body, &LEGACY).unwrap(), packet);
        assert!(body.is_empty());
    }

    #[test]
    fn position_object_layout() {
        let packet = PositionObject { object_id: 1, position: Position::new(1.0, 0.0, -2.5) };
        let bytes = packet.to_bytes(&CURRENT).unwrap();
        assert_eq!(bytes.len(), 2 + 4 + 12);
        assert_eq!(&bytes[6..10], &1.0f32.to_be_bytes());
        assert_eq!(&bytes[14..18], &(-2.5f32).to_be_bytes());
    }

    #[test]
    fn truncated_position_fails() {
        let mut src = Bytes::from_static(&[0, 0, 0, 1, 0x3F, 0x80, 0, 0]);
        let err = PositionObject::parse(&mut src, &CURRENT).unwrap_err();
        assert!(matches!(err, crate::ProtocolError::Truncated { field: "y", .. }));
    }
}
