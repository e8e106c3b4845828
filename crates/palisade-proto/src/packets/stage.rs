//! Stage requests: lifecycle, navigation, locking and binary state.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    ClientContext, Opcode, Packet,
    codec::{get_blob, get_string, get_u8, get_u16, get_u32, put_blob, put_string},
    errors::Result,
};

/// Store the password the caller will present on its next reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetStagePass {
    /// Password (empty clears it)
    pub password: String,
}

impl Packet for SetStagePass {
    const OPCODE: Opcode = Opcode::SetStagePass;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        put_string(dst, &self.password, "password")
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self { password: get_string(src, "password")? })
    }
}

/// Create a stage hosted by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateStage {
    /// Correlation handle echoed in the ack
    pub ack_handle: u32,
    /// Maximum active + reserved members
    pub capacity: u16,
    /// Stage id
    pub stage_id: String,
    /// Join password; empty means none
    pub password: String,
}

impl Packet for CreateStage {
    const OPCODE: Opcode = Opcode::CreateStage;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.ack_handle);
        dst.put_u16(self.capacity);
        put_string(dst, &self.stage_id, "stage_id")?;
        put_string(dst, &self.password, "password")
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self {
            ack_handle: get_u32(src, "ack_handle")?,
            capacity: get_u16(src, "capacity")?,
            stage_id: get_string(src, "stage_id")?,
            password: get_string(src, "password")?,
        })
    }
}

/// Reserve a slot in a stage, or refresh the ready flag of an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveStage {
    /// Correlation handle echoed in the ack
    pub ack_handle: u32,
    /// Ready flag stored with the slot
    pub ready: u8,
    /// Stage id
    pub stage_id: String,
}

impl Packet for ReserveStage {
    const OPCODE: Opcode = Opcode::ReserveStage;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.ack_handle);
        dst.put_u8(self.ready);
        put_string(dst, &self.stage_id, "stage_id")
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self {
            ack_handle: get_u32(src, "ack_handle")?,
            ready: get_u8(src, "ready")?,
            stage_id: get_string(src, "stage_id")?,
        })
    }
}

/// Drop the caller's reservation, if any. Empty body, no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnreserveStage;

impl Packet for UnreserveStage {
    const OPCODE: Opcode = Opcode::UnreserveStage;

    fn build(&self, _ctx: &ClientContext, _dst: &mut BytesMut) -> Result<()> {
        Ok(())
    }

    fn parse(_src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self)
    }
}

/// Enter a stage, creating it if it does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnterStage {
    /// Correlation handle echoed in the ack
    pub ack_handle: u32,
    /// Destination stage id
    pub stage_id: String,
}

impl Packet for EnterStage {
    const OPCODE: Opcode = Opcode::EnterStage;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.ack_handle);
        put_string(dst, &self.stage_id, "stage_id")
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self { ack_handle: get_u32(src, "ack_handle")?, stage_id: get_string(src, "stage_id")? })
    }
}

/// Move to another stage. Same transfer as [`EnterStage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveStage {
    /// Correlation handle echoed in the ack
    pub ack_handle: u32,
    /// Destination stage id
    pub stage_id: String,
}

impl Packet for MoveStage {
    const OPCODE: Opcode = Opcode::MoveStage;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.ack_handle);
        put_string(dst, &self.stage_id, "stage_id")
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self { ack_handle: get_u32(src, "ack_handle")?, stage_id: get_string(src, "stage_id")? })
    }
}

/// Return to the stage the caller came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackStage {
    /// Correlation handle echoed in the ack
    pub ack_handle: u32,
}

impl Packet for BackStage {
    const OPCODE: Opcode = Opcode::BackStage;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.ack_handle);
        Ok(())
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self { ack_handle: get_u32(src, "ack_handle")? })
    }
}

/// Close a hosted stage to new reservations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStage {
    /// Correlation handle echoed in the ack
    pub ack_handle: u32,
    /// Stage id
    pub stage_id: String,
}

impl Packet for LockStage {
    const OPCODE: Opcode = Opcode::LockStage;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.ack_handle);
        put_string(dst, &self.stage_id, "stage_id")
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self { ack_handle: get_u32(src, "ack_handle")?, stage_id: get_string(src, "stage_id")? })
    }
}

/// Reopen the caller's reserved stage. Empty body, no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockStage;

impl Packet for UnlockStage {
    const OPCODE: Opcode = Opcode::UnlockStage;

    fn build(&self, _ctx: &ClientContext, _dst: &mut BytesMut) -> Result<()> {
        Ok(())
    }

    fn parse(_src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self)
    }
}

/// Store an opaque blob on a stage. No reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetStageBinary {
    /// First key byte
    pub type0: u8,
    /// Second key byte
    pub type1: u8,
    /// Stage id
    pub stage_id: String,
    /// Blob
    pub data: Bytes,
}

impl Packet for SetStageBinary {
    const OPCODE: Opcode = Opcode::SetStageBinary;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u8(self.type0);
        dst.put_u8(self.type1);
        put_string(dst, &self.stage_id, "stage_id")?;
        put_blob(dst, &self.data, "data")
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self {
            type0: get_u8(src, "type0")?,
            type1: get_u8(src, "type1")?,
            stage_id: get_string(src, "stage_id")?,
            data: get_blob(src, "data")?,
        })
    }
}

/// Binary read request body shared by get and wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageBinaryKey {
    /// Correlation handle echoed in the ack
    pub ack_handle: u32,
    /// First key byte
    pub type0: u8,
    /// Second key byte
    pub type1: u8,
    /// Stage id
    pub stage_id: String,
}

impl StageBinaryKey {
    fn build(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.ack_handle);
        dst.put_u8(self.type0);
        dst.put_u8(self.type1);
        put_string(dst, &self.stage_id, "stage_id")
    }

    fn parse(src: &mut Bytes) -> Result<Self> {
        Ok(Self {
            ack_handle: get_u32(src, "ack_handle")?,
            type0: get_u8(src, "type0")?,
            type1: get_u8(src, "type1")?,
            stage_id: get_string(src, "stage_id")?,
        })
    }
}

/// Read a stage blob; fails if absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetStageBinary(pub StageBinaryKey);

impl Packet for GetStageBinary {
    const OPCODE: Opcode = Opcode::GetStageBinary;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        self.0.build(dst)
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        StageBinaryKey::parse(src).map(Self)
    }
}

/// Read a stage blob, polling a bounded number of times until present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitStageBinary(pub StageBinaryKey);

impl Packet for WaitStageBinary {
    const OPCODE: Opcode = Opcode::WaitStageBinary;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        self.0.build(dst)
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        StageBinaryKey::parse(src).map(Self)
    }
}
