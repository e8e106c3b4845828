//! Server error types.

use palisade_crypto::CryptoError;
use palisade_proto::ProtocolError;
use thiserror::Error;

/// Errors that stop the server or its accept loop.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error (unreadable file, bad TOML, invalid secret).
    ///
    /// Fatal at startup. Fix the configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error (bind failure, accept failure).
    ///
    /// May be transient (accept) or fatal (bind address in use).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Internal error (unexpected state, logic bug).
    ///
    /// Should never happen in a correct implementation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(TransportError::Io(err))
    }
}

/// Errors on one connection's encrypted stream.
///
/// Every variant tears the connection down; the session is logged out.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket read or write failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Header rejected before the body was read
    #[error("bad transport header: {0}")]
    Header(#[from] ProtocolError),

    /// Body failed authentication or replayed a packet number
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Outbound body larger than the transport allows
    #[error("outbound frame too large: {size} bytes, max {max}")]
    FrameTooLarge {
        /// Plaintext size
        size: usize,
        /// Limit
        max: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_display() {
        let err = ServerError::Config("missing transport_secret".to_string());
        assert_eq!(err.to_string(), "configuration error: missing transport_secret");

        let err = ServerError::from(std::io::Error::other("address in use"));
        assert_eq!(err.to_string(), "transport error: I/O error: address in use");
    }

    #[test]
    fn transport_error_wraps_crypto() {
        let err = TransportError::from(CryptoError::Replay { last: 4, received: 2 });
        assert!(err.to_string().starts_with("crypto error:"));
    }
}
