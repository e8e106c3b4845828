//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while parsing or building wire data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Opcode has no entry in the opcode table
    #[error("unknown opcode {0:#06x}")]
    UnknownOpcode(u16),

    /// Body ended before a field could be read
    #[error("truncated {field}: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Field being read
        field: &'static str,
        /// Bytes the field needs
        needed: usize,
        /// Bytes left in the body
        remaining: usize,
    },

    /// String field is not valid UTF-8
    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 {
        /// Field being read
        field: &'static str,
    },

    /// Field holds a value outside its domain
    #[error("invalid value {value} for {field}")]
    InvalidValue {
        /// Field being read
        field: &'static str,
        /// Offending value
        value: u64,
    },

    /// Field too long to encode with its length prefix
    #[error("{field} too long: {len} bytes, max {max}")]
    FieldTooLong {
        /// Field being written
        field: &'static str,
        /// Actual length
        len: usize,
        /// Maximum encodable length
        max: usize,
    },

    /// Transport header shorter than its fixed size
    #[error("frame too short: expected {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Required size
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Transport payload above the size limit
    #[error("payload too large: {size} bytes, max {max}")]
    PayloadTooLarge {
        /// Claimed size
        size: usize,
        /// Limit
        max: usize,
    },
}
