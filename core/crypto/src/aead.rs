//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305,
};

use crate::keys::StoreKey;
use expenses_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Output of a single encryption: the nonce and `ciphertext || tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

/// Encrypt plaintext under a fresh random nonce.
///
/// # Postconditions
/// - The ciphertext length is plaintext length + TAG_SIZE
/// - Two calls with the same input never share a nonce
pub fn encrypt(key: &StoreKey, plaintext: &[u8]) -> Result<Sealed> {
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(&nonce);

    Ok(Sealed {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypt and authenticate `ciphertext || tag`.
///
/// # Errors
/// - `Error::Decryption` if the ciphertext is too short
/// - `Error::Decryption` if authentication fails (wrong key or tampered data)
pub fn decrypt(key: &StoreKey, nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(Error::Decryption("Ciphertext too short".to_string()));
    }

    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

    cipher
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Decryption("Authentication failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LENGTH;

    fn key(byte: u8) -> StoreKey {
        StoreKey::from_bytes([byte; KEY_LENGTH])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let sealed = encrypt(&key(42), b"Hello, World!").unwrap();
        let decrypted = decrypt(&key(42), &sealed.nonce, &sealed.ciphertext).unwrap();
        assert_eq!(decrypted, b"Hello, World!");
    }

    #[test]
    fn test_ciphertext_size() {
        let plaintext = b"Test message";
        let sealed = encrypt(&key(42), plaintext).unwrap();
        assert_eq!(sealed.ciphertext.len(), plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_different_nonce_each_time() {
        let ct1 = encrypt(&key(42), b"Same plaintext").unwrap();
        let ct2 = encrypt(&key(42), b"Same plaintext").unwrap();
        assert_ne!(ct1.nonce, ct2.nonce);
        assert_ne!(ct1.ciphertext, ct2.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt(&key(1), b"Secret data").unwrap();
        let result = decrypt(&key(2), &sealed.nonce, &sealed.ciphertext);
        assert!(matches!(result, Err(Error::Decryption(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut sealed = encrypt(&key(42), b"Important data").unwrap();
        sealed.ciphertext[5] ^= 0xFF;
        assert!(decrypt(&key(42), &sealed.nonce, &sealed.ciphertext).is_err());
    }

    #[test]
    fn test_short_ciphertext_fails() {
        let result = decrypt(&key(42), &[0u8; NONCE_SIZE], &[0u8; TAG_SIZE - 1]);
        assert!(matches!(result, Err(Error::Decryption(_))));
    }

    #[test]
    fn test_empty_plaintext() {
        let sealed = encrypt(&key(42), b"").unwrap();
        let decrypted = decrypt(&key(42), &sealed.nonce, &sealed.ciphertext).unwrap();
        assert!(decrypted.is_empty());
    }
}
