//! Common types used throughout the store.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Encryption passphrase that zeroizes on drop and never prints.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Passphrase(String);

impl Passphrase {
    /// Create a passphrase.
    ///
    /// # Errors
    /// - Returns error if the passphrase is empty
    pub fn new(passphrase: impl Into<String>) -> crate::Result<Self> {
        let passphrase = passphrase.into();
        if passphrase.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Passphrase cannot be empty".to_string(),
            ));
        }
        Ok(Self(passphrase))
    }

    /// Get the UTF-8 bytes of the passphrase.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Passphrase([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passphrase_empty_fails() {
        assert!(Passphrase::new("").is_err());
    }

    #[test]
    fn test_passphrase_debug_redacted() {
        let p = Passphrase::new("hunter2").unwrap();
        assert_eq!(format!("{:?}", p), "Passphrase([REDACTED])");
        assert_eq!(p.as_bytes(), b"hunter2");
    }
}
