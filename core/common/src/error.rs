//! Common error types for the expenses store.

use thiserror::Error;

/// Top-level error type for store operations.
///
/// Every layer returns this closed set of kinds so callers can match on
/// the kind and pick a corrective action (prompt for a passphrase, show a
/// conflict, reopen the store).
#[derive(Debug, Error)]
pub enum Error {
    /// Requested document does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write supplied a stale or missing revision.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A plaintext open found the encryption mark; a passphrase is needed.
    #[error("Store may be encrypted, a passphrase is required")]
    MaybeEncrypted,

    /// The passphrase does not unlock the encryption mark.
    #[error("Invalid passphrase")]
    InvalidPassphrase,

    /// The encryption mark exists but is not in the encrypted shape.
    #[error("Store is not encrypted: {0}")]
    NotEncrypted(String),

    /// The collection holds documents but no encryption mark.
    #[error("Store is not empty: {0}")]
    NotEmpty(String),

    /// Authenticated decryption failed or the ciphertext is malformed.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Transport failure talking to a remote database.
    #[error("Network error: {0}")]
    Network(String),

    /// Remote database rejected the credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not permitted.
    #[error("Not permitted: {0}")]
    NotPermitted(String),
}

impl Error {
    /// Whether this error is the recoverable "document does not exist" kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether this error is an optimistic-concurrency failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
