//! Cryptographic primitives for RFB authentication.
//!
//! Everything here is used only during the security handshake; the pixel
//! path never touches it. The schemes are what VNC servers actually deploy,
//! which means several legacy constructions (DES challenge-response,
//! AES-ECB credential blocks, finite-field DH with server-chosen groups)
//! live here deliberately. Treat this crate as protocol compatibility
//! machinery, not a general-purpose crypto library.

pub mod aes;
pub mod des;
pub mod dh;
pub mod ra2;

pub use dh::{DhGroup, DhKeyPair};
pub use ra2::{MessageCipher, TagError};
