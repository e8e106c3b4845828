//! Palisade Transport Cryptography
//!
//! Encryption layer wrapped around every game connection. Pure functions and
//! small value types with deterministic outputs; the server and test clients
//! drive them with their own packet counters.
//!
//! # Key Schedule
//!
//! ```text
//! Shared Transport Secret (32 bytes, from configuration)
//!        │
//!        ▼
//! HKDF-SHA256 ──► Client→Server key
//!            └──► Server→Client key
//!        │
//!        ▼
//! XChaCha20-Poly1305 (nonce = direction || packet number)
//! ```
//!
//! Each direction owns its own key and its own strictly increasing packet
//! counter, so a (key, nonce) pair is never reused for the lifetime of a
//! connection.
//!
//! # Security
//!
//! - Integrity: every frame carries a Poly1305 tag; tampering is a hard
//!   decryption failure and the connection is dropped by the caller.
//! - Replay: the receiver rejects packet numbers that do not advance.
//! - Key hygiene: derived keys are zeroized on drop.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod cipher;
mod derivation;
mod error;

pub use cipher::{Direction, FrameCipher, NONCE_SIZE, TAG_SIZE};
pub use derivation::{TransportKeys, derive_transport_keys};
pub use error::CryptoError;
