//! Key types with secure memory handling.
//!
//! Keys zeroize their memory on drop so that derived material does not
//! outlive the store that owns it.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use expenses_common::Passphrase;

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Symmetric key protecting every document of an encrypted collection.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StoreKey {
    key: [u8; KEY_LENGTH],
}

impl StoreKey {
    /// Create a key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Derive the key for a passphrase.
    ///
    /// The key is the BLAKE2b-256 digest of the UTF-8 passphrase, so the
    /// same passphrase always yields the same key and no salt needs to be
    /// stored next to the collection.
    pub fn derive(passphrase: &Passphrase) -> Self {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(passphrase.as_bytes());

        let digest = hasher.finalize();
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&digest);
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl PartialEq for StoreKey {
    fn eq(&self, other: &Self) -> bool {
        self.key.ct_eq(&other.key).into()
    }
}

impl Eq for StoreKey {}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_deterministic() {
        let p = Passphrase::new("correct horse").unwrap();
        assert_eq!(StoreKey::derive(&p), StoreKey::derive(&p));
    }

    #[test]
    fn test_derive_different_passphrases() {
        let k1 = StoreKey::derive(&Passphrase::new("one").unwrap());
        let k2 = StoreKey::derive(&Passphrase::new("two").unwrap());
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_debug_redacted() {
        let key = StoreKey::from_bytes([7u8; KEY_LENGTH]);
        assert_eq!(format!("{:?}", key), "StoreKey([REDACTED])");
    }
}
