//! Per-direction key derivation using HKDF

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Salt binding derived keys to this protocol
const TRANSPORT_SALT: &[u8] = b"palisadeTransportV1";

/// Label for the client-to-server key
const CLIENT_LABEL: &[u8] = b"client->server";

/// Label for the server-to-client key
const SERVER_LABEL: &[u8] = b"server->client";

/// Key pair for one connection: one key per direction.
pub struct TransportKeys {
    client_to_server: [u8; 32],
    server_to_client: [u8; 32],
}

impl TransportKeys {
    /// Key protecting frames sent by the client.
    pub fn client_to_server(&self) -> &[u8; 32] {
        &self.client_to_server
    }

    /// Key protecting frames sent by the server.
    pub fn server_to_client(&self) -> &[u8; 32] {
        &self.server_to_client
    }
}

impl Clone for TransportKeys {
    fn clone(&self) -> Self {
        Self { client_to_server: self.client_to_server, server_to_client: self.server_to_client }
    }
}

impl Drop for TransportKeys {
    fn drop(&mut self) {
        self.client_to_server.zeroize();
        self.server_to_client.zeroize();
    }
}

impl std::fmt::Debug for TransportKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportKeys").finish_non_exhaustive()
    }
}

/// Derive the two direction keys from the shared transport secret.
///
/// # Errors
///
/// - `InvalidKeyLength` if the secret is shorter than 32 bytes
///
/// # Security
///
/// - Deterministic: both ends derive identical keys from the same secret
/// - Direction separation: the two keys are independent HKDF outputs, so a
///   frame sealed for one direction never opens in the other
pub fn derive_transport_keys(secret: &[u8]) -> Result<TransportKeys, CryptoError> {
    if secret.len() < 32 {
        return Err(CryptoError::InvalidKeyLength { expected: 32, actual: secret.len() });
    }

    let hkdf = Hkdf::<Sha256>::new(Some(TRANSPORT_SALT), secret);

    let mut client_to_server = [0u8; 32];
    let mut server_to_client = [0u8; 32];
    let (Ok(()), Ok(())) =
        (hkdf.expand(CLIENT_LABEL, &mut client_to_server), hkdf.expand(SERVER_LABEL, &mut server_to_client))
    else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    Ok(TransportKeys { client_to_server, server_to_client })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8; 32] = b"palisade_test_transport_secret!!";

    #[test]
    fn derive_is_deterministic() {
        let a = derive_transport_keys(SECRET).unwrap();
        let b = derive_transport_keys(SECRET).unwrap();

        assert_eq!(a.client_to_server(), b.client_to_server());
        assert_eq!(a.server_to_client(), b.server_to_client());
    }

    #[test]
    fn directions_are_independent() {
        let keys = derive_transport_keys(SECRET).unwrap();
        assert_ne!(keys.client_to_server(), keys.server_to_client());
    }

    #[test]
    fn different_secrets_produce_different_keys() {
        let a = derive_transport_keys(SECRET).unwrap();
        let b = derive_transport_keys(&[0x42; 32]).unwrap();

        assert_ne!(a.client_to_server(), b.client_to_server());
    }

    #[test]
    fn short_secret_is_rejected() {
        let result = derive_transport_keys(b"too short");
        assert_eq!(result.err(), Some(CryptoError::InvalidKeyLength { expected: 32, actual: 9 }));
    }

    #[test]
    fn debug_does_not_leak_keys() {
        let keys = derive_transport_keys(SECRET).unwrap();
        assert_eq!(format!("{keys:?}"), "TransportKeys { .. }");
    }
}
