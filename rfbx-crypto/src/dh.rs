//! Diffie-Hellman key agreement over raw big-endian byte groups.
//!
//! Two authentication schemes use classic finite-field DH with parameters
//! supplied on the wire: Apple Remote Desktop (prime of `key_length`
//! bytes) and MSLogonII (8-byte prime). Public values and shared secrets
//! are exchanged as fixed-width big-endian byte strings, left-padded with
//! zeros to the prime's width.

use num_bigint::BigUint;
use rand::RngCore;

/// A DH group as supplied by the server, with all values at a fixed byte
/// width.
pub struct DhGroup {
    generator: BigUint,
    prime: BigUint,
    width: usize,
}

/// One side's key pair within a [`DhGroup`].
pub struct DhKeyPair {
    secret: BigUint,
    /// Public value, left-padded to the group width.
    pub public: Vec<u8>,
}

impl DhGroup {
    /// Build a group from wire values. `width` is the byte length of the
    /// prime as transmitted; all derived values use the same width.
    pub fn new(generator: &[u8], prime: &[u8]) -> Self {
        Self {
            generator: BigUint::from_bytes_be(generator),
            prime: BigUint::from_bytes_be(prime),
            width: prime.len(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Generate a private exponent of the group width and its public value
    /// `g^x mod p`.
    pub fn generate_keypair(&self, rng: &mut dyn RngCore) -> DhKeyPair {
        let mut buf = vec![0u8; self.width];
        rng.fill_bytes(&mut buf);
        let secret = BigUint::from_bytes_be(&buf);
        let public = self.generator.modpow(&secret, &self.prime);
        DhKeyPair {
            secret,
            public: self.pad(&public),
        }
    }

    /// Derive the shared secret `peer^x mod p`, padded to the group width.
    pub fn shared_secret(&self, keypair: &DhKeyPair, peer_public: &[u8]) -> Vec<u8> {
        let peer = BigUint::from_bytes_be(peer_public);
        let shared = peer.modpow(&keypair.secret, &self.prime);
        self.pad(&shared)
    }

    fn pad(&self, value: &BigUint) -> Vec<u8> {
        let bytes = value.to_bytes_be();
        let mut out = vec![0u8; self.width];
        out[self.width - bytes.len()..].copy_from_slice(&bytes);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agreement() {
        // Small textbook group: p = 23, g = 5.
        let group = DhGroup::new(&[5], &[23]);
        let mut rng = rand::thread_rng();

        let a = group.generate_keypair(&mut rng);
        let b = group.generate_keypair(&mut rng);

        let s1 = group.shared_secret(&a, &b.public);
        let s2 = group.shared_secret(&b, &a.public);
        assert_eq!(s1, s2);
        assert_eq!(s1.len(), 1);
    }

    #[test]
    fn test_width_padding() {
        // 8-byte group like MSLogonII; results stay 8 bytes even when the
        // numeric value is small.
        let prime = [0, 0, 0, 0, 0, 0, 0, 23];
        let group = DhGroup::new(&[0, 0, 0, 0, 0, 0, 0, 5], &prime);
        let mut rng = rand::thread_rng();
        let kp = group.generate_keypair(&mut rng);
        assert_eq!(kp.public.len(), 8);
        let shared = group.shared_secret(&kp, &kp.public);
        assert_eq!(shared.len(), 8);
    }

    #[test]
    fn test_known_exponentiation() {
        // 5^6 mod 23 = 8.
        let group = DhGroup::new(&[5], &[23]);
        let kp = DhKeyPair {
            secret: BigUint::from(6u32),
            public: vec![8],
        };
        // peer public 5 => 5^6 mod 23 = 8.
        assert_eq!(group.shared_secret(&kp, &[5]), vec![8]);
    }
}
