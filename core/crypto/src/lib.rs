//! Cryptographic primitives for the encrypted document store.
//!
//! This module provides:
//! - Key derivation from a passphrase (BLAKE2b-256)
//! - Authenticated encryption using XChaCha20-Poly1305
//! - The `hex(nonce)|hex(ciphertext)` wire format used for documents at rest
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Decryption fails closed: tampered or malformed input never yields plaintext

pub mod aead;
pub mod cipher;
pub mod keys;

pub use aead::{decrypt, encrypt};
pub use cipher::Cipher;
pub use keys::{StoreKey, KEY_LENGTH};
