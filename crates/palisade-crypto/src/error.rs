//! Error types for transport cryptography

use thiserror::Error;

/// Errors from sealing or opening transport frames
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Authentication tag did not verify (wrong key or tampered bytes)
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for decryption failure
        reason: String,
    },

    /// Packet number did not advance past the last accepted one
    #[error("replayed packet: last accepted {last}, got {received}")]
    Replay {
        /// Last accepted packet number
        last: u64,
        /// Packet number carried by the rejected frame
        received: u64,
    },

    /// Outbound packet counter exhausted
    #[error("packet counter exhausted for {direction}")]
    CounterExhausted {
        /// Direction whose counter ran out
        direction: &'static str,
    },

    /// Invalid key material length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length
        expected: usize,
        /// Actual key length
        actual: usize,
    },
}

impl CryptoError {
    /// Returns true if the connection that produced this error must be closed.
    ///
    /// Every variant except a short key at configuration time means the peer
    /// is out of sync with us, and there is no way to resynchronise a stream
    /// cipher mid-connection.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidKeyLength { .. })
    }
}
