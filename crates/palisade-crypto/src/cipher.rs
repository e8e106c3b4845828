//! Frame encryption using `XChaCha20-Poly1305`
//!
//! One `FrameCipher` protects one direction of one connection. The sealing
//! side numbers its frames; the opening side checks that the numbers advance.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};

use crate::error::CryptoError;

/// Size of the `XChaCha20` nonce (24 bytes)
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Which way a frame travels. Part of the nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Frames sent by the game client
    ClientToServer,
    /// Frames sent by the server
    ServerToClient,
}

impl Direction {
    fn tag(self) -> u8 {
        match self {
            Self::ClientToServer => 0x01,
            Self::ServerToClient => 0x02,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::ClientToServer => "client->server",
            Self::ServerToClient => "server->client",
        }
    }
}

/// Stateful AEAD for one direction of a connection.
pub struct FrameCipher {
    cipher: XChaCha20Poly1305,
    direction: Direction,
    /// Packet number for the next sealed frame
    next_packet: u64,
    /// Highest packet number accepted by `open`
    last_opened: Option<u64>,
}

impl FrameCipher {
    /// Create a cipher for `direction` keyed with `key`.
    pub fn new(key: &[u8; 32], direction: Direction) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(key.into()),
            direction,
            next_packet: 0,
            last_opened: None,
        }
    }

    /// Direction this cipher protects.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Encrypt `plaintext` under the next packet number.
    ///
    /// Returns the packet number the receiver needs together with the
    /// ciphertext (plaintext length + [`TAG_SIZE`]).
    ///
    /// # Errors
    ///
    /// - `CounterExhausted` once `u64::MAX` frames have been sealed
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<(u64, Vec<u8>), CryptoError> {
        let packet_num = self.next_packet;
        self.next_packet = packet_num
            .checked_add(1)
            .ok_or(CryptoError::CounterExhausted { direction: self.direction.name() })?;

        let nonce = build_nonce(self.direction, packet_num);
        let Ok(ciphertext) = self.cipher.encrypt(XNonce::from_slice(&nonce), plaintext) else {
            unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
        };

        Ok((packet_num, ciphertext))
    }

    /// Decrypt a frame carrying `packet_num`.
    ///
    /// # Errors
    ///
    /// - `Replay` if `packet_num` does not advance past the last opened frame
    /// - `DecryptionFailed` if the tag does not verify
    pub fn open(&mut self, packet_num: u64, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if let Some(last) = self.last_opened {
            if packet_num <= last {
                return Err(CryptoError::Replay { last, received: packet_num });
            }
        }

        let nonce = build_nonce(self.direction, packet_num);
        let plaintext = self.cipher.decrypt(XNonce::from_slice(&nonce), ciphertext).map_err(|_| {
            CryptoError::DecryptionFailed { reason: "authentication failed".to_string() }
        })?;

        self.last_opened = Some(packet_num);
        Ok(plaintext)
    }
}

impl std::fmt::Debug for FrameCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCipher")
            .field("direction", &self.direction)
            .field("next_packet", &self.next_packet)
            .field("last_opened", &self.last_opened)
            .finish_non_exhaustive()
    }
}

/// Build a 24-byte nonce for `XChaCha20`.
///
/// Structure:
/// - byte 0: direction tag
/// - bytes 1-15: zero
/// - bytes 16-23: packet number (big-endian)
fn build_nonce(direction: Direction, packet_num: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[0] = direction.tag();
    nonce[16..24].copy_from_slice(&packet_num.to_be_bytes());
    nonce
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const KEY: [u8; 32] = [0x5A; 32];

    fn pair(direction: Direction) -> (FrameCipher, FrameCipher) {
        (FrameCipher::new(&KEY, direction), FrameCipher::new(&KEY, direction))
    }

    #[test]
    fn seal_open_roundtrip() {
        let (mut sender, mut receiver) = pair(Direction::ServerToClient);

        let (num, sealed) = sender.seal(b"\x00\x12hello\x00\x10").unwrap();
        let opened = receiver.open(num, &sealed).unwrap();

        assert_eq!(num, 0);
        assert_eq!(opened, b"\x00\x12hello\x00\x10");
    }

    #[test]
    fn packet_numbers_advance() {
        let (mut sender, _) = pair(Direction::ClientToServer);

        let nums: Vec<u64> = (0..4).map(|_| sender.seal(b"x").unwrap().0).collect();
        assert_eq!(nums, vec![0, 1, 2, 3]);
    }

    #[test]
    fn ciphertext_carries_tag() {
        let (mut sender, _) = pair(Direction::ClientToServer);
        let (_, sealed) = sender.seal(b"twelve bytes").unwrap();
        assert_eq!(sealed.len(), 12 + TAG_SIZE);
    }

    #[test]
    fn replayed_packet_is_rejected() {
        let (mut sender, mut receiver) = pair(Direction::ClientToServer);

        let (num, sealed) = sender.seal(b"once").unwrap();
        receiver.open(num, &sealed).unwrap();

        let result = receiver.open(num, &sealed);
        assert_eq!(result, Err(CryptoError::Replay { last: 0, received: 0 }));
    }

    #[test]
    fn wrong_direction_fails() {
        let mut sender = FrameCipher::new(&KEY, Direction::ClientToServer);
        let mut receiver = FrameCipher::new(&KEY, Direction::ServerToClient);

        let (num, sealed) = sender.seal(b"crossed wires").unwrap();
        assert!(matches!(receiver.open(num, &sealed), Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let (mut sender, mut receiver) = pair(Direction::ServerToClient);

        let (num, mut sealed) = sender.seal(b"original").unwrap();
        sealed[0] ^= 0xFF;

        assert!(matches!(receiver.open(num, &sealed), Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn failed_open_does_not_advance_window() {
        let (mut sender, mut receiver) = pair(Direction::ServerToClient);

        let (num, sealed) = sender.seal(b"payload").unwrap();
        let mut broken = sealed.clone();
        broken[0] ^= 0x01;

        assert!(receiver.open(num, &broken).is_err());
        assert!(receiver.open(num, &sealed).is_ok());
    }

    #[test]
    fn nonce_structure() {
        let nonce = build_nonce(Direction::ServerToClient, 0x0102_0304_0506_0708);

        assert_eq!(nonce[0], 0x02);
        assert_eq!(&nonce[1..16], &[0u8; 15]);
        assert_eq!(&nonce[16..24], &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
    }

    proptest! {
        #[test]
        fn sequence_of_frames_opens_in_order(
            frames in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..512), 1..16)
        ) {
            let (mut sender, mut receiver) = pair(Direction::ClientToServer);

            for frame in &frames {
                let (num, sealed) = sender.seal(frame).unwrap();
                let opened = receiver.open(num, &sealed).unwrap();
                prop_assert_eq!(&opened, frame);
            }
        }
    }
}
