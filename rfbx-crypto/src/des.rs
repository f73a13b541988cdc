//! DES primitives for the legacy VNC authentication schemes.
//!
//! VNC Authentication (security type 2) derives its DES key from the
//! password with a historical quirk: the password is truncated/zero-padded
//! to 8 bytes and every byte has its bits reversed before being used as
//! the key. The 16-byte server challenge is then encrypted as two 8-byte
//! blocks in ECB mode.
//!
//! MSLogonII reuses DES in CBC mode, keyed directly with the 8-byte
//! Diffie-Hellman secret (no bit reversal; the reversal is a VNC password
//! quirk only).

use cipher::{BlockEncrypt, KeyInit};
use des::Des;

/// Reverse the bits within a single byte (the VNC password-key quirk).
fn reverse_bits(byte: u8) -> u8 {
    let mut result = 0u8;
    for i in 0..8 {
        if byte & (1 << i) != 0 {
            result |= 1 << (7 - i);
        }
    }
    result
}

/// Derive the VNC DES key from a password: ASCII bytes, right-padded with
/// zeros to 8 bytes, each byte bit-reversed. An empty password yields the
/// all-zero key.
pub fn vnc_key(password: &str) -> [u8; 8] {
    let mut key = [0u8; 8];
    for (i, &byte) in password.as_bytes().iter().take(8).enumerate() {
        key[i] = reverse_bits(byte);
    }
    key
}

/// Encrypt a 16-byte VNC authentication challenge with the password-derived
/// key, two 8-byte blocks in ECB mode.
pub fn encrypt_challenge(password: &str, challenge: &[u8; 16]) -> [u8; 16] {
    let cipher = Des::new_from_slice(&vnc_key(password)).expect("8-byte key");

    let mut out = [0u8; 16];
    for (i, block) in challenge.chunks_exact(8).enumerate() {
        let mut b: [u8; 8] = block.try_into().expect("8-byte block");
        let mut ga = b.into();
        cipher.encrypt_block(&mut ga);
        b.copy_from_slice(&ga);
        out[i * 8..(i + 1) * 8].copy_from_slice(&b);
    }
    out
}

/// DES-CBC encrypt `data` in place with a raw 8-byte key and IV.
///
/// `data.len()` must be a multiple of 8; MSLogonII uses fixed 256- and
/// 64-byte credential blocks.
pub fn cbc_encrypt(key: &[u8; 8], iv: &[u8; 8], data: &mut [u8]) {
    debug_assert!(data.len() % 8 == 0);
    let cipher = Des::new_from_slice(key).expect("8-byte key");

    let mut prev = *iv;
    for block in data.chunks_exact_mut(8) {
        for (b, p) in block.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        let mut ga = <[u8; 8]>::try_from(&*block).expect("8-byte block").into();
        cipher.encrypt_block(&mut ga);
        block.copy_from_slice(&ga);
        prev.copy_from_slice(block);
    }
}
