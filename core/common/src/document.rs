//! Revisioned documents exchanged with the underlying database.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

/// Reserved field holding the document id.
pub const ID_FIELD: &str = "id";

/// Reserved field holding the document revision.
pub const REVISION_FIELD: &str = "revision";

/// Opaque optimistic-concurrency token assigned by the database.
///
/// Formatted as `<generation>-<hash>`. Revisions order by generation first
/// and then by hash, which gives every replica the same winner when two
/// writes race.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Build a revision from a generation and a hash.
    pub fn new(generation: u64, hash: impl AsRef<str>) -> Self {
        Self(format!("{}-{}", generation, hash.as_ref()))
    }

    /// Wrap a revision string received from a database.
    pub fn parse(value: impl Into<String>) -> crate::Result<Self> {
        let value = value.into();
        match value.split_once('-') {
            Some((gen, hash)) if gen.parse::<u64>().is_ok() && !hash.is_empty() => Ok(Self(value)),
            _ => Err(crate::Error::InvalidInput(format!(
                "Malformed revision: {}",
                value
            ))),
        }
    }

    /// Write counter of the document; zero if the token is foreign.
    pub fn generation(&self) -> u64 {
        self.0
            .split_once('-')
            .and_then(|(gen, _)| gen.parse().ok())
            .unwrap_or(0)
    }

    fn hash(&self) -> &str {
        self.0.split_once('-').map(|(_, h)| h).unwrap_or(&self.0)
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation()
            .cmp(&other.generation())
            .then_with(|| self.hash().cmp(other.hash()))
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A document in a collection.
///
/// `id` and `revision` are reserved; every other field lives in `body`.
/// Tombstones (`deleted == true`) are only visible to replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique id within the collection.
    pub id: String,
    /// Revision last read, or `None` for a new document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<Revision>,
    /// Tombstone marker.
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    /// Non-reserved fields.
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Document {
    /// Create a new document without a revision.
    pub fn new(id: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            revision: None,
            deleted: false,
            body,
        }
    }

    /// Build a document from a JSON object holding `id` (and optionally
    /// `revision`) next to the body fields.
    pub fn from_value(value: Value) -> crate::Result<Self> {
        if !value.is_object() {
            return Err(crate::Error::Serialization(
                "Document must be a JSON object".to_string(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize to a JSON object with reserved fields inlined.
    pub fn to_value(&self) -> crate::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Set the revision, consuming self.
    pub fn with_revision(mut self, revision: Option<Revision>) -> Self {
        self.revision = revision;
        self
    }

    /// Drop the revision so the document can be written into a fresh collection.
    pub fn without_revision(self) -> Self {
        self.with_revision(None)
    }

    /// Create a tombstone for this id at the given revision.
    pub fn tombstone(id: impl Into<String>, revision: Revision) -> Self {
        Self {
            id: id.into(),
            revision: Some(revision),
            deleted: true,
            body: Map::new(),
        }
    }

    /// Get a body field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }
}
