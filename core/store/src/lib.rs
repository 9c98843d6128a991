//! Encrypted local document store for the expenses ledger.
//!
//! This module provides:
//! - Transparent at-rest encryption of document bodies
//! - Passphrase validation through a hidden mark document
//! - Passphrase rotation (encrypt, decrypt, re-key) of whole collections
//! - Cursor pagination over ledger entries
//! - One-shot replication of the ledger with a peer
//!
//! # Architecture
//! [`StoreManager`] owns a settings [`Store`] and a ledger [`Store`]. Each
//! store is plaintext or encrypted over a collection of an
//! `expenses_storage` backend.

pub mod config;
pub mod cursor;
pub mod ledger;
pub mod manager;
pub mod mark;
pub mod store;
pub mod transform;

pub use config::StoreConfig;
pub use cursor::{Page, PageCursor};
pub use ledger::{LedgerEntry, Posting, Settings, SETTINGS_ID};
pub use manager::{InitResponse, RemoteDescriptor, StoreManager};
pub use mark::{MARK_ID, MARK_UUID};
pub use store::{EncryptedStore, PlainStore, Store, ValidatedStore};
pub use transform::{decrypt_doc, encrypt_doc, is_encrypted_shape, CRYPT_FIELD};
