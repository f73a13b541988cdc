//! RA2ne authentication (security type 6, RealVNC "RSA-AES no
//! encryption").
//!
//! The exchange, in order:
//!
//! 1. receive the server RSA key (bit length, modulus, exponent) and have
//!    the host approve it;
//! 2. send a fresh 2048-bit client RSA key;
//! 3. exchange 16-byte randoms, each RSA-PKCS#1 v1.5 encrypted under the
//!    peer's key;
//! 4. derive the two AES-128-EAX session ciphers from SHA-1 of the
//!    randoms (one per direction, independent little-endian counters);
//! 5. exchange and verify SHA-1 hashes of both public keys under the
//!    session ciphers;
//! 6. receive the credential subtype (1 = user+pass, 2 = password only)
//!    and send the credentials AEAD-wrapped.

use crate::engine::Session;
use crate::errors::ClientError;
use crate::security::AuthOutcome;
use rand::RngCore;
use rfbx_crypto::MessageCipher;
use rfbx_render::Renderer;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};

const CLIENT_KEY_BITS: usize = 2048;
const CLIENT_KEY_BYTES: usize = CLIENT_KEY_BITS / 8;

impl<R: Renderer> Session<R> {
    pub(super) async fn auth_ra2(&mut self) -> Result<AuthOutcome, ClientError> {
        // 1. Server public key, subject to host approval.
        let server_bits = self.stream.read_u32().await?;
        if !(1024..=8192).contains(&server_bits) {
            return Err(ClientError::ProtocolViolation(format!(
                "RA2: server key length {server_bits} outside 1024-8192"
            )));
        }
        let server_key_bytes = (server_bits as usize).div_ceil(8);
        let server_n = self.stream.read_bytes(server_key_bytes).await?;
        let server_e = self.stream.read_bytes(server_key_bytes).await?;

        let mut server_blob = server_bits.to_be_bytes().to_vec();
        server_blob.extend_from_slice(&server_n);
        server_blob.extend_from_slice(&server_e);
        self.verify_server("RSA", server_blob.clone()).await?;

        let server_key = RsaPublicKey::new(
            BigUint::from_bytes_be(&server_n),
            BigUint::from_bytes_be(&server_e),
        )
        .map_err(|e| ClientError::ProtocolViolation(format!("RA2: bad server key: {e}")))?;

        // 2. Fresh client key, and the random exchange (step 3). Scoped so
        // the thread-local rng (not `Send`) is dropped before the reads
        // below, which `.await`.
        let (client_key, client_blob, client_random, encrypted) = {
            let mut rng = rand::thread_rng();
            let client_key = RsaPrivateKey::new(&mut rng, CLIENT_KEY_BITS).map_err(|e| {
                ClientError::AuthenticationFailed(format!("RA2: key generation: {e}"))
            })?;

            let mut client_blob = (CLIENT_KEY_BITS as u32).to_be_bytes().to_vec();
            client_blob
                .extend_from_slice(&left_pad(&client_key.n().to_bytes_be(), CLIENT_KEY_BYTES));
            client_blob
                .extend_from_slice(&left_pad(&client_key.e().to_bytes_be(), CLIENT_KEY_BYTES));

            let mut client_random = [0u8; 16];
            rng.fill_bytes(&mut client_random);
            let encrypted = server_key
                .encrypt(&mut rng, Pkcs1v15Encrypt, &client_random)
                .map_err(|e| ClientError::AuthenticationFailed(format!("RA2: encrypt: {e}")))?;

            (client_key, client_blob, client_random, encrypted)
        };
        self.send.push_bytes(&client_blob)?;
        self.send.flush()?;

        self.send.push_u16(server_key_bytes as u16)?;
        self.send.push_bytes(&encrypted)?;
        self.send.flush()?;

        let announced = self.stream.read_u16().await? as usize;
        if announced != CLIENT_KEY_BYTES {
            return Err(ClientError::ProtocolViolation(format!(
                "RA2: server random block is {announced} bytes, expected {CLIENT_KEY_BYTES}"
            )));
        }
        let encrypted_server_random = self.stream.read_bytes(CLIENT_KEY_BYTES).await?;
        let server_random = client_key
            .decrypt(Pkcs1v15Encrypt, &encrypted_server_random)
            .map_err(|_| ClientError::AuthenticationFailed("RA2: random decryption failed".into()))?;
        if server_random.len() != 16 {
            return Err(ClientError::AuthenticationFailed(format!(
                "RA2: server random is {} bytes, expected 16",
                server_random.len()
            )));
        }

        // 4. Session ciphers, one per direction.
        let client_session_key = session_key(&server_random, &client_random);
        let server_session_key = session_key(&client_random, &server_random);
        let mut client_cipher = MessageCipher::new(&client_session_key);
        let mut server_cipher = MessageCipher::new(&server_session_key);

        // 5. Mutual key-hash verification.
        let client_hash: [u8; 20] =
            Sha1::digest([client_blob.as_slice(), server_blob.as_slice()].concat()).into();
        let server_hash: [u8; 20] =
            Sha1::digest([server_blob.as_slice(), client_blob.as_slice()].concat()).into();

        self.send.push_bytes(&client_cipher.make_message(&client_hash))?;
        self.send.flush()?;

        let len = self.stream.read_u16().await?;
        let body = self.stream.read_bytes(len as usize + 16).await?;
        let received_hash = server_cipher
            .receive_message(len, &body)
            .map_err(|_| ClientError::AuthenticationFailed("RA2: bad server hash tag".into()))?;
        if received_hash != server_hash.as_slice() {
            return Err(ClientError::AuthenticationFailed(
                "RA2: server hash mismatch".into(),
            ));
        }

        // 6. Credential subtype and credentials.
        let len = self.stream.read_u16().await?;
        if len != 1 {
            return Err(ClientError::ProtocolViolation(format!(
                "RA2: subtype message length {len}, expected 1"
            )));
        }
        let body = self.stream.read_bytes(1 + 16).await?;
        let subtype = server_cipher
            .receive_message(1, &body)
            .map_err(|_| ClientError::AuthenticationFailed("RA2: bad subtype tag".into()))?[0];

        let (username, password) = match subtype {
            1 => {
                self.require_credentials(&["username", "password"]).await?;
                (
                    self.config.credentials.username.clone().unwrap_or_default(),
                    self.config.credentials.password.clone().unwrap_or_default(),
                )
            }
            2 => {
                self.require_credentials(&["password"]).await?;
                (
                    String::new(),
                    self.config.credentials.password.clone().unwrap_or_default(),
                )
            }
            other => {
                return Err(ClientError::ProtocolViolation(format!(
                    "RA2: unknown credential subtype {other}"
                )))
            }
        };

        let mut plain = Vec::with_capacity(username.len() + password.len() + 3);
        plain.push(username.len() as u8);
        plain.extend_from_slice(username.as_bytes());
        plain.push(0);
        plain.push(password.len() as u8);
        plain.extend_from_slice(password.as_bytes());

        self.send.push_bytes(&client_cipher.make_message(&plain))?;
        self.send.flush()?;
        Ok(AuthOutcome::Done)
    }
}

/// First 16 bytes of `SHA1(a then b)`.
fn session_key(a: &[u8], b: &[u8]) -> [u8; 16] {
    let digest: [u8; 20] = Sha1::digest([a, b].concat()).into();
    digest[..16].try_into().expect("SHA-1 is 20 bytes")
}

/// Left-pad a big-endian integer to a fixed width.
fn left_pad(bytes: &[u8], width: usize) -> Vec<u8> {
    let mut out = vec![0u8; width];
    out[width - bytes.len()..].copy_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_keys_are_directional() {
        let a = [1u8; 16];
        let b = [2u8; 16];
        assert_ne!(session_key(&a, &b), session_key(&b, &a));
    }

    #[test]
    fn test_left_pad() {
        assert_eq!(left_pad(&[1, 2], 4), vec![0, 0, 1, 2]);
        assert_eq!(left_pad(&[9; 4], 4), vec![9; 4]);
    }
}
