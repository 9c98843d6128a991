//! Common utilities and types shared across the expenses store crates.
//!
//! This module provides the closed error taxonomy used by every layer and
//! the revisioned document model that flows between the store and the
//! underlying database.

pub mod document;
pub mod error;
pub mod types;

pub use document::{Document, Revision};
pub use error::{Error, Result};
pub use types::Passphrase;
