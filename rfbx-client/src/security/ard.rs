//! Apple Remote Desktop authentication (security type 30).
//!
//! Diffie-Hellman over a server-supplied group, then a 128-byte
//! credential block (username at offset 0, password at offset 64, both
//! NUL-terminated and at most 63 bytes, the rest random) encrypted with
//! AES-128-ECB keyed by the MD5 of the shared secret. The client sends
//! the ciphertext followed by its DH public value.

use crate::engine::Session;
use crate::errors::ClientError;
use crate::security::AuthOutcome;
use md5::{Digest, Md5};
use rand::RngCore;
use rfbx_crypto::DhGroup;
use rfbx_render::Renderer;

impl<R: Renderer> Session<R> {
    pub(super) async fn auth_ard(&mut self) -> Result<AuthOutcome, ClientError> {
        let generator = self.stream.read_bytes(2).await?;
        let key_length = self.stream.read_u16().await? as usize;
        let prime = self.stream.read_bytes(key_length).await?;
        let server_public = self.stream.read_bytes(key_length).await?;

        self.require_credentials(&["username", "password"]).await?;
        let username = self.config.credentials.username.clone().unwrap_or_default();
        let password = self.config.credentials.password.clone().unwrap_or_default();

        let mut rng = rand::thread_rng();
        let group = DhGroup::new(&generator, &prime);
        let keypair = group.generate_keypair(&mut rng);
        let shared = group.shared_secret(&keypair, &server_public);

        let aes_key: [u8; 16] = Md5::digest(&shared).into();

        let mut credentials = [0u8; 128];
        rng.fill_bytes(&mut credentials);
        write_c_string(&mut credentials[0..64], &username);
        write_c_string(&mut credentials[64..128], &password);
        rfbx_crypto::aes::ecb_encrypt(&aes_key, &mut credentials);

        self.send.push_bytes(&credentials)?;
        self.send.push_bytes(&keypair.public)?;
        self.send.flush()?;
        Ok(AuthOutcome::Done)
    }
}

/// Copy at most 63 bytes of `text` into the field and NUL-terminate it.
fn write_c_string(field: &mut [u8], text: &str) {
    let bytes = text.as_bytes();
    let len = bytes.len().min(63);
    field[..len].copy_from_slice(&bytes[..len]);
    field[len] = 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_c_string_truncates_and_terminates() {
        let mut field = [0xFFu8; 64];
        write_c_string(&mut field, "user");
        assert_eq!(&field[..4], b"user");
        assert_eq!(field[4], 0);
        assert_eq!(field[5], 0xFF); // random filler untouched

        let long = "x".repeat(100);
        let mut field = [0xFFu8; 64];
        write_c_string(&mut field, &long);
        assert_eq!(field[62], b'x');
        assert_eq!(field[63], 0);
    }
}
