//! Connection-level requests: no-op, keepalive, login, logout, log key.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    ClientContext, Opcode, Packet, ProtocolVersion,
    codec::{get_string, get_u8, get_u32, put_string},
    errors::Result,
};

/// No-op filler. Empty body, no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nop;

impl Packet for Nop {
    const OPCODE: Opcode = Opcode::Nop;

    fn build(&self, _ctx: &ClientContext, _dst: &mut BytesMut) -> Result<()> {
        Ok(())
    }

    fn parse(_src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self)
    }
}

/// Keepalive. Answered with a simple success ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ping {
    /// Correlation handle echoed in the ack
    pub ack_handle: u32,
}

impl Packet for Ping {
    const OPCODE: Opcode = Opcode::Ping;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.ack_handle);
        Ok(())
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self { ack_handle: get_u32(src, "ack_handle")? })
    }
}

/// Attach a player identity to the connection.
///
/// The player id is already authenticated upstream; the server takes it as
/// given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    /// Correlation handle echoed in the ack
    pub ack_handle: u32,
    /// Authenticated player id (non-zero)
    pub player_id: u32,
    /// Protocol revision the client speaks
    pub version: ProtocolVersion,
    /// Display name
    pub name: String,
}

impl Packet for Login {
    const OPCODE: Opcode = Opcode::Login;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.ack_handle);
        dst.put_u32(self.player_id);
        dst.put_u8(self.version.to_byte());
        put_string(dst, &self.name, "name")
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self {
            ack_handle: get_u32(src, "ack_handle")?,
            player_id: get_u32(src, "player_id")?,
            version: ProtocolVersion::from_byte(get_u8(src, "version")?),
            name: get_string(src, "name")?,
        })
    }
}

/// Graceful disconnect. No reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logout {
    /// Client-reported reason code, logged only
    pub reason: u8,
}

impl Packet for Logout {
    const OPCODE: Opcode = Opcode::Logout;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u8(self.reason);
        Ok(())
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self { reason: get_u8(src, "reason")? })
    }
}

/// Request a fresh 16-byte log key, returned in a buffer ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueLogkey {
    /// Correlation handle echoed in the ack
    pub ack_handle: u32,
}

impl Packet for IssueLogkey {
    const OPCODE: Opcode = Opcode::IssueLogkey;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.ack_handle);
        Ok(())
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self { ack_handle: get_u32(src, "ack_handle")? })
    }
}
