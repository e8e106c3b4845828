//! Opaque message relay.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    ClientContext, Opcode, Packet,
    codec::{get_blob, get_u8, get_u32, put_blob},
    errors::{ProtocolError, Result},
};

/// Who receives a relayed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BroadcastType {
    /// The listed player ids
    Targeted,
    /// Everyone in the sender's current stage
    Stage,
    /// Everyone on this channel server
    Server,
    /// Everyone on every linked channel server
    World,
    /// Active members of the sender's semaphore
    Semaphore,
}

impl BroadcastType {
    /// Wire value.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Targeted => 0x01,
            Self::Stage => 0x03,
            Self::Server => 0x06,
            Self::World => 0x0A,
            Self::Semaphore => 0x10,
        }
    }

    /// Parse a wire value.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidValue` for values outside the table
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Targeted),
            0x03 => Ok(Self::Stage),
            0x06 => Ok(Self::Server),
            0x0A => Ok(Self::World),
            0x10 => Ok(Self::Semaphore),
            other => {
                Err(ProtocolError::InvalidValue { field: "broadcast_type", value: u64::from(other) })
            },
        }
    }
}

/// Relay `data` to the recipients selected by `broadcast_type`.
///
/// `targets` is only meaningful for [`BroadcastType::Targeted`] and is sent
/// empty otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastBinary {
    /// Recipient selection
    pub broadcast_type: BroadcastType,
    /// Application message type, relayed untouched
    pub message_type: u8,
    /// Recipient player ids for targeted casts
    pub targets: Vec<u32>,
    /// Opaque message
    pub data: Bytes,
}

impl Packet for CastBinary {
    const OPCODE: Opcode = Opcode::CastBinary;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        let count = u8::try_from(self.targets.len()).map_err(|_| ProtocolError::FieldTooLong {
            field: "targets",
            len: self.targets.len(),
            max: u8::MAX as usize,
        })?;
        dst.put_u8(self.broadcast_type.to_u8());
        dst.put_u8(self.message_type);
        dst.put_u8(count);
        for target in &self.targets {
            dst.put_u32(*target);
        }
        put_blob(dst, &self.data, "data")
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        let broadcast_type = BroadcastType::from_u8(get_u8(src, "broadcast_type")?)?;
        let message_type = get_u8(src, "message_type")?;
        let count = get_u8(src, "targets")?;
        let targets = (0..count).map(|_| get_u32(src, "targets")).collect::<Result<Vec<_>>>()?;
        let data = get_blob(src, "data")?;
        Ok(Self { broadcast_type, message_type, targets, data })
    }
}

/// A relayed message as delivered to recipients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastedBinary {
    /// Player id of the sender
    pub sender_player_id: u32,
    /// Recipient selection the sender used
    pub broadcast_type: BroadcastType,
    /// Application message type
    pub message_type: u8,
    /// Opaque message
    pub data: Bytes,
}

impl Packet for CastedBinary {
    const OPCODE: Opcode = Opcode::CastedBinary;

    fn build(&self, _ctx: &ClientContext, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.sender_player_id);
        dst.put_u8(self.broadcast_type.to_u8());
        dst.put_u8(self.message_type);
        put_blob(dst, &self.data, "data")
    }

    fn parse(src: &mut Bytes, _ctx: &ClientContext) -> Result<Self> {
        Ok(Self {
            sender_player_id: get_u32(src, "sender_player_id")?,
            broadcast_type: BroadcastType::from_u8(get_u8(src, "broadcast_type")?)?,
            message_type: get_u8(src, "message_type")?,
            data: get_blob(src, "data")?,
        })
    }
}
