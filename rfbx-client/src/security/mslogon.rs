//! MSLogonII authentication (security type 113, UltraVNC).
//!
//! An 8-byte Diffie-Hellman exchange produces the DES key; the username
//! (256-byte block) and password (64-byte block) are random-initialized,
//! NUL-terminated, and DES-CBC encrypted with both key and IV set to the
//! shared secret. The secret is used raw; the bit-reversal quirk belongs
//! to VNC password keys only.

use crate::engine::Session;
use crate::errors::ClientError;
use crate::security::AuthOutcome;
use rand::RngCore;
use rfbx_crypto::DhGroup;
use rfbx_render::Renderer;

impl<R: Renderer> Session<R> {
    pub(super) async fn auth_mslogon2(&mut self) -> Result<AuthOutcome, ClientError> {
        let generator = self.stream.read_bytes(8).await?;
        let prime = self.stream.read_bytes(8).await?;
        let server_public = self.stream.read_bytes(8).await?;

        self.require_credentials(&["username", "password"]).await?;
        let username = self.config.credentials.username.clone().unwrap_or_default();
        let password = self.config.credentials.password.clone().unwrap_or_default();

        let mut rng = rand::thread_rng();
        let group = DhGroup::new(&generator, &prime);
        let keypair = group.generate_keypair(&mut rng);
        let secret = group.shared_secret(&keypair, &server_public);
        let key: [u8; 8] = secret[..8].try_into().expect("8-byte DH group");

        let mut user_block = [0u8; 256];
        let mut pass_block = [0u8; 64];
        rng.fill_bytes(&mut user_block);
        rng.fill_bytes(&mut pass_block);
        write_c_string(&mut user_block, &username);
        write_c_string(&mut pass_block, &password);

        rfbx_crypto::des::cbc_encrypt(&key, &key, &mut user_block);
        rfbx_crypto::des::cbc_encrypt(&key, &key, &mut pass_block);

        self.send.push_bytes(&keypair.public)?;
        self.send.push_bytes(&user_block)?;
        self.send.push_bytes(&pass_block)?;
        self.send.flush()?;
        Ok(AuthOutcome::Done)
    }
}

/// Copy the text into the block, NUL-terminated, leaving the random tail.
fn write_c_string(block: &mut [u8], text: &str) {
    let bytes = text.as_bytes();
    let len = bytes.len().min(block.len() - 1);
    block[..len].copy_from_slice(&bytes[..len]);
    block[len] = 0;
}
