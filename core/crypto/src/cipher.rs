//! Passphrase-bound cipher producing the at-rest wire format.
//!
//! Encrypted payloads are rendered as `hex(nonce) + "|" + hex(ciphertext || tag)`.

use std::sync::OnceLock;
use subtle::ConstantTimeEq;
use tracing::trace;

use crate::aead::{self, NONCE_SIZE};
use crate::keys::StoreKey;
use expenses_common::{Error, Passphrase, Result};

/// Separator between the nonce and the ciphertext in the wire format.
pub const SEPARATOR: char = '|';

/// Cipher bound to one passphrase.
///
/// The key is derived on first use and memoized for the lifetime of the
/// instance.
pub struct Cipher {
    passphrase: Passphrase,
    key: OnceLock<StoreKey>,
}

impl Cipher {
    /// Create a cipher for a passphrase. No key is derived yet.
    pub fn new(passphrase: Passphrase) -> Self {
        Self {
            passphrase,
            key: OnceLock::new(),
        }
    }

    /// The passphrase this cipher was built from.
    pub fn passphrase(&self) -> &Passphrase {
        &self.passphrase
    }

    /// Constant-time check that `other` is this cipher's passphrase.
    pub fn is_passphrase(&self, other: &Passphrase) -> bool {
        self.passphrase.as_bytes().ct_eq(other.as_bytes()).into()
    }

    /// Get the derived key, deriving it once.
    pub fn key(&self) -> &StoreKey {
        self.key.get_or_init(|| {
            trace!("Deriving store key");
            StoreKey::derive(&self.passphrase)
        })
    }

    /// Encrypt bytes into the wire format.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let sealed = aead::encrypt(self.key(), plaintext)?;
        Ok(format!(
            "{}{}{}",
            hex::encode(sealed.nonce),
            SEPARATOR,
            hex::encode(&sealed.ciphertext)
        ))
    }

    /// Decrypt a wire-format string back to bytes.
    ///
    /// # Errors
    /// - `Error::Decryption` if the format is malformed
    /// - `Error::Decryption` if authentication fails
    pub fn decrypt(&self, data: &str) -> Result<Vec<u8>> {
        let (nonce_hex, ciphertext_hex) = data
            .split_once(SEPARATOR)
            .ok_or_else(|| Error::Decryption("Missing nonce separator".to_string()))?;

        let nonce_bytes = hex::decode(nonce_hex)
            .map_err(|e| Error::Decryption(format!("Malformed nonce: {}", e)))?;
        let nonce: [u8; NONCE_SIZE] = nonce_bytes
            .try_into()
            .map_err(|_| Error::Decryption("Invalid nonce length".to_string()))?;
        let ciphertext = hex::decode(ciphertext_hex)
            .map_err(|e| Error::Decryption(format!("Malformed ciphertext: {}", e)))?;

        aead::decrypt(self.key(), &nonce, &ciphertext)
    }

    /// Encrypt a UTF-8 string.
    pub fn encrypt_str(&self, plaintext: &str) -> Result<String> {
        self.encrypt(plaintext.as_bytes())
    }

    /// Decrypt to a UTF-8 string.
    pub fn decrypt_str(&self, data: &str) -> Result<String> {
        let bytes = self.decrypt(data)?;
        String::from_utf8(bytes)
            .map_err(|_| Error::Decryption("Plaintext is not valid UTF-8".to_string()))
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cipher(p: &str) -> Cipher {
        Cipher::new(Passphrase::new(p).unwrap())
    }

    #[test]
    fn test_wire_format() {
        let c = cipher("secret");
        let wire = c.encrypt_str("hello").unwrap();
        let (nonce, ct) = wire.split_once('|').unwrap();
        assert_eq!(nonce.len(), NONCE_SIZE * 2);
        assert_eq!(ct.len(), (5 + aead::TAG_SIZE) * 2);
        assert!(wire.chars().all(|ch| ch == '|' || ch.is_ascii_hexdigit()));
        assert_eq!(c.decrypt_str(&wire).unwrap(), "hello");
    }

    #[test]
    fn test_key_is_memoized() {
        let c = cipher("secret");
        let first = c.key() as *const StoreKey;
        let second = c.key() as *const StoreKey;
        assert_eq!(first, second);
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let wire = cipher("one").encrypt_str("data").unwrap();
        assert!(matches!(
            cipher("two").decrypt_str(&wire),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn test_malformed_inputs_fail() {
        let c = cipher("secret");
        for bad in ["", "no-separator", "zz|00", "00|zz", "0011|00112233445566778899aabbccddeeff"] {
            assert!(matches!(c.decrypt(bad), Err(Error::Decryption(_))), "{}", bad);
        }
    }

    #[test]
    fn test_is_passphrase() {
        let c = cipher("secret");
        assert!(c.is_passphrase(&Passphrase::new("secret").unwrap()));
        assert!(!c.is_passphrase(&Passphrase::new("secret2").unwrap()));
    }

    proptest! {
        #[test]
        fn prop_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let c = cipher("prop");
            let wire = c.encrypt(&data).unwrap();
            prop_assert_eq!(c.decrypt(&wire).unwrap(), data);
        }

        #[test]
        fn prop_bit_flip_detected(
            data in proptest::collection::vec(any::<u8>(), 1..128),
            index in any::<usize>(),
            bit in 0u8..8,
        ) {
            let c = cipher("prop");
            let wire = c.encrypt(&data).unwrap();
            let (nonce, ct) = wire.split_once('|').unwrap();
            let mut raw = hex::decode(ct).unwrap();
            let i = index % raw.len();
            raw[i] ^= 1 << bit;
            let tampered = format!("{}|{}", nonce, hex::encode(raw));
            prop_assert!(c.decrypt(&tampered).is_err());
        }
    }
}
