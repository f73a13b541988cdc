//! The RSA-AES session cipher used after the RA2ne key exchange.
//!
//! Each direction of the connection owns one [`MessageCipher`]: AES-128 in
//! EAX mode with a 16-byte counter nonce and the plaintext length as
//! associated data. The counter starts at zero and is incremented as a
//! little-endian multiprecision integer after every AEAD operation, so the
//! two peers stay in step as long as neither drops a message.
//!
//! Wire framing per message:
//!
//! ```text
//! +----------------+------------------+-----------+
//! | u16 BE length  | ciphertext (len) | tag (16)  |
//! +----------------+------------------+-----------+
//! ```

use aes::Aes128;
use eax::aead::generic_array::GenericArray;
use eax::aead::{Aead, KeyInit, Payload};
use eax::Eax;
use thiserror::Error;

type Aes128Eax = Eax<Aes128>;

/// Authenticated decryption failed (bad tag or corrupted frame).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("message authentication failed")]
pub struct TagError;

/// One direction of an RA2 session: AES-128-EAX with a little-endian
/// counter nonce.
pub struct MessageCipher {
    cipher: Aes128Eax,
    counter: [u8; 16],
}

impl MessageCipher {
    pub fn new(key: &[u8; 16]) -> Self {
        Self {
            cipher: Aes128Eax::new(GenericArray::from_slice(key)),
            counter: [0u8; 16],
        }
    }

    /// Increment the counter as a little-endian multiprecision integer.
    fn advance(&mut self) {
        for byte in self.counter.iter_mut() {
            let (v, carry) = byte.overflowing_add(1);
            *byte = v;
            if !carry {
                break;
            }
        }
    }

    /// Encrypt one message, producing the full wire frame
    /// `[u16 BE len] ‖ ciphertext ‖ tag`.
    pub fn make_message(&mut self, plaintext: &[u8]) -> Vec<u8> {
        debug_assert!(plaintext.len() <= u16::MAX as usize);
        let len = plaintext.len() as u16;
        let aad = len.to_be_bytes();
        let sealed = self
            .cipher
            .encrypt(
                GenericArray::from_slice(&self.counter),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .expect("EAX encryption is infallible for in-memory buffers");
        self.advance();

        let mut out = Vec::with_capacity(2 + sealed.len());
        out.extend_from_slice(&aad);
        out.extend_from_slice(&sealed);
        out
    }

    /// Decrypt one message given its announced plaintext length and the
    /// `ciphertext ‖ tag` body. Rejects on tag failure without advancing
    /// out of step (the counter only advances on success).
    pub fn receive_message(&mut self, length: u16, body: &[u8]) -> Result<Vec<u8>, TagError> {
        let aad = length.to_be_bytes();
        let plain = self
            .cipher
            .decrypt(
                GenericArray::from_slice(&self.counter),
                Payload { msg: body, aad: &aad },
            )
            .map_err(|_| TagError)?;
        if plain.len() != length as usize {
            return Err(TagError);
        }
        self.advance();
        Ok(plain)
    }
}
