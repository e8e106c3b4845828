//! Opcode table.
//!
//! Opcodes are 2-byte big-endian identifiers at the start of every game
//! packet. The table is closed: anything not listed here is rejected by
//! [`Opcode::from_u16`] and the dispatcher stops processing the buffer.

/// Game packet opcodes
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    // Framing and session
    /// Batch terminator
    End = 0x0010,
    /// No operation
    Nop = 0x0011,
    /// Generic acknowledgement (server to client)
    Ack = 0x0012,
    /// Keepalive
    Ping = 0x0013,
    /// Attach a player identity to the connection
    Login = 0x0014,
    /// Graceful disconnect
    Logout = 0x0015,
    /// Request a fresh log key
    IssueLogkey = 0x0016,

    // Stage
    /// Store the password used for the next reservation
    SetStagePass = 0x0020,
    /// Create a stage
    CreateStage = 0x0021,
    /// Reserve a slot in a stage
    ReserveStage = 0x0022,
    /// Drop the caller's reservation
    UnreserveStage = 0x0023,
    /// Enter a stage
    EnterStage = 0x0024,
    /// Move to another stage
    MoveStage = 0x0025,
    /// Return to the previous stage
    BackStage = 0x0026,
    /// Close a stage to new reservations
    LockStage = 0x0027,
    /// Reopen the caller's reserved stage
    UnlockStage = 0x0028,
    /// Store a stage binary blob
    SetStageBinary = 0x0029,
    /// Read a stage binary blob
    GetStageBinary = 0x002A,
    /// Read a stage binary blob, polling until present
    WaitStageBinary = 0x002B,

    // Objects and users
    /// Clear the client's local world (server to client)
    CleanupObject = 0x0030,
    /// Place an object in the current stage
    CreateObject = 0x0031,
    /// Replicate an object (server to client)
    DuplicateObject = 0x0032,
    /// Update an object's position
    PositionObject = 0x0033,
    /// Remove an object (server to client)
    DeleteObject = 0x0034,
    /// Replicate a player (server to client)
    InsertUser = 0x0035,
    /// Remove a player (server to client)
    DeleteUser = 0x0036,

    // Relay
    /// Relay an opaque message
    CastBinary = 0x0040,
    /// Relayed message (server to client)
    CastedBinary = 0x0041,

    // Semaphores
    /// Create a semaphore if missing and reserve a slot
    CreateAcquireSemaphore = 0x0050,
    /// Promote a reserved semaphore slot to active
    AcquireSemaphore = 0x0051,
    /// Leave the caller's semaphore
    ReleaseSemaphore = 0x0052,
    /// Query whether a semaphore exists
    CheckSemaphore = 0x0053,
}

impl Opcode {
    /// Every opcode in wire order.
    pub const ALL: [Opcode; 32] = [
        Self::End,
        Self::Nop,
        Self::Ack,
        Self::Ping,
        Self::Login,
        Self::Logout,
        Self::IssueLogkey,
        Self::SetStagePass,
        Self::CreateStage,
        Self::ReserveStage,
        Self::UnreserveStage,
        Self::EnterStage,
        Self::MoveStage,
        Self::BackStage,
        Self::LockStage,
        Self::UnlockStage,
        Self::SetStageBinary,
        Self::GetStageBinary,
        Self::WaitStageBinary,
        Self::CleanupObject,
        Self::CreateObject,
        Self::DuplicateObject,
        Self::PositionObject,
        Self::DeleteObject,
        Self::InsertUser,
        Self::DeleteUser,
        Self::CastBinary,
        Self::CastedBinary,
        Self::CreateAcquireSemaphore,
        Self::AcquireSemaphore,
        Self::ReleaseSemaphore,
        Self::CheckSemaphore,
    ];

    /// Resolve a raw opcode. Returns `None` for values outside the table.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        let opcode = match value {
            0x0010 => Self::End,
            0x0011 => Self::Nop,
            0x0012 => Self::Ack,
            0x0013 => Self::Ping,
            0x0014 => Self::Login,
            0x0015 => Self::Logout,
            0x0016 => Self::IssueLogkey,
            0x0020 => Self::SetStagePass,
            0x0021 => Self::CreateStage,
            0x0022 => Self::ReserveStage,
            0x0023 => Self::UnreserveStage,
            0x0024 => Self::EnterStage,
            0x0025 => Self::MoveStage,
            0x0026 => Self::BackStage,
            0x0027 => Self::LockStage,
            0x0028 => Self::UnlockStage,
            0x0029 => Self::SetStageBinary,
            0x002A => Self::GetStageBinary,
            0x002B => Self::WaitStageBinary,
            0x0030 => Self::CleanupObject,
            0x0031 => Self::CreateObject,
            0x0032 => Self::DuplicateObject,
            0x0033 => Self::PositionObject,
            0x0034 => Self::DeleteObject,
            0x0035 => Self::InsertUser,
            0x0036 => Self::DeleteUser,
            0x0040 => Self::CastBinary,
            0x0041 => Self::CastedBinary,
            0x0050 => Self::CreateAcquireSemaphore,
            0x0051 => Self::AcquireSemaphore,
            0x0052 => Self::ReleaseSemaphore,
            0x0053 => Self::CheckSemaphore,
            _ => return None,
        };
        Some(opcode)
    }

    /// Raw wire value.
    #[must_use]
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Big-endian wire bytes.
    #[must_use]
    pub fn to_be_bytes(self) -> [u8; 2] {
        self.to_u16().to_be_bytes()
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}({:#06x})", self.to_u16())
    }
}
