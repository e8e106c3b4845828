//! Semaphore requests.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    ClientContext, Opcode, Packet,
    codec::{get_string, get_u16, get_u32, put_string},
    errors::Result,
};

/// Create the semaphore if missing, then reserve a slot in it.
///
/// Acked with the semaphore's numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateAcquireSemaphore {
    /// Correlation handle echoed in the ack
    pub ack_handle: u32,
    /// Capacity used if the semaphore is created
    pub capacity: u16,
    /// Semaphore name
    pub semaphore_id: String,
}

impl Packet for CreateAcquireSemaphore {
    const OPCODE: Opcode = Opcode::CreateAcquireSemaphore;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.ack_handle);
        dst.put_u16(self.capacity);
        put_string(dst, &self.semaphore_id, "semaphore_id")
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self {
            ack_handle: get_u32(src, "ack_handle")?,
            capacity: get_u16(src, "capacity")?,
            semaphore_id: get_string(src, "semaphore_id")?,
        })
    }
}

/// Promote the caller's reserved slot to active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireSemaphore {
    /// Correlation handle echoed in the ack
    pub ack_handle: u32,
    /// Semaphore name
    pub semaphore_id: String,
}

impl Packet for AcquireSemaphore {
    const OPCODE: Opcode = Opcode::AcquireSemaphore;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.ack_handle);
        put_string(dst, &self.semaphore_id, "semaphore_id")
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self {
            ack_handle: get_u32(src, "ack_handle")?,
            semaphore_id: get_string(src, "semaphore_id")?,
        })
    }
}

/// Leave the caller's semaphore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseSemaphore {
    /// Correlation handle echoed in the ack
    pub ack_handle: u32,
}

impl Packet for ReleaseSemaphore {
    const OPCODE: Opcode = Opcode::ReleaseSemaphore;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.ack_handle);
        Ok(())
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self { ack_handle: get_u32(src, "ack_handle")? })
    }
}

/// Ask whether a semaphore exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSemaphore {
    /// Correlation handle echoed in the ack
    pub ack_handle: u32,
    /// Semaphore name
    pub semaphore_id: String,
}

impl Packet for CheckSemaphore {
    const OPCODE: Opcode = Opcode::CheckSemaphore;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.ack_handle);
        put_string(dst, &self.semaphore_id, "semaphore_id")
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self {
            ack_handle: get_u32(src, "ack_handle")?,
            semaphore_id: get_string(src, "semaphore_id")?,
        })
    }
}
