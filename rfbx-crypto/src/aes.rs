//! AES-128-ECB over whole buffers.
//!
//! Apple Remote Desktop authentication encrypts its 128-byte credential
//! block with AES-128-ECB keyed by the MD5 of the Diffie-Hellman shared
//! secret. ECB is fine here only because the plaintext is a single-use
//! random-filled block.

use aes::Aes128;
use cipher::{BlockEncrypt, KeyInit};

/// AES-128-ECB encrypt `data` in place. `data.len()` must be a multiple
/// of 16.
pub fn ecb_encrypt(key: &[u8; 16], data: &mut [u8]) {
    debug_assert!(data.len() % 16 == 0);
    let cipher = Aes128::new(key.into());
    for block in data.chunks_exact_mut(16) {
        let mut ga = <[u8; 16]>::try_from(&*block).expect("16-byte block").into();
        cipher.encrypt_block(&mut ga);
        block.copy_from_slice(&ga);
    }
}
