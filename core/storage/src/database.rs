//! Revisioned document database trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use expenses_common::{Document, Error, Result, Revision};

/// Options for a key-range listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Maximum number of rows to return.
    pub limit: Option<usize>,
    /// Inclusive id to start from.
    pub start_key: Option<String>,
    /// Walk ids from highest to lowest.
    pub descending: bool,
}

impl ListOptions {
    /// List every live document in ascending id order.
    pub fn all() -> Self {
        Self::default()
    }

    /// Set the row limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the inclusive start key.
    pub fn start_key(mut self, key: impl Into<String>) -> Self {
        self.start_key = Some(key.into());
        self
    }

    /// Walk in descending order.
    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }
}

/// Per-document outcome of a bulk write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BulkWriteOutcome {
    /// Document was written at the given revision.
    Written { id: String, revision: Revision },
    /// Document was rejected because its revision is stale.
    Conflict { id: String },
}

impl BulkWriteOutcome {
    /// Whether the document was written.
    pub fn is_written(&self) -> bool {
        matches!(self, BulkWriteOutcome::Written { .. })
    }

    /// Id of the document this outcome refers to.
    pub fn id(&self) -> &str {
        match self {
            BulkWriteOutcome::Written { id, .. } | BulkWriteOutcome::Conflict { id } => id,
        }
    }
}

/// Summary information about a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// Collection name.
    pub name: String,
    /// Number of live (non-deleted) documents.
    pub doc_count: u64,
}

/// A single named collection of revisioned documents.
///
/// Writes use optimistic concurrency: a write must carry the revision it
/// last read, or no revision for a new document. Reads of a missing or
/// deleted id fail with `Error::NotFound`.
#[async_trait]
pub trait DocumentDatabase: Send + Sync {
    /// Collection name.
    fn name(&self) -> &str;

    /// Document count and name.
    async fn info(&self) -> Result<DatabaseInfo>;

    /// Read a live document.
    ///
    /// # Errors
    /// - `Error::NotFound` if the id is missing or deleted
    async fn get(&self, id: &str) -> Result<Document>;

    /// Create or update a document, returning its new revision.
    ///
    /// # Errors
    /// - `Error::Conflict` if the supplied revision is stale
    async fn put(&self, doc: Document) -> Result<Revision>;

    /// Delete a document at the given revision.
    ///
    /// # Errors
    /// - `Error::NotFound` if the id does not exist
    /// - `Error::Conflict` if the revision is stale
    async fn remove(&self, id: &str, revision: &Revision) -> Result<Revision>;

    /// List live documents by id range.
    async fn list(&self, options: ListOptions) -> Result<Vec<Document>>;

    /// Write many documents; a conflict on one does not abort the others.
    async fn bulk_write(&self, docs: Vec<Document>) -> Result<Vec<BulkWriteOutcome>>;

    /// Every document including tombstones, ascending by id.
    async fn changes(&self) -> Result<Vec<Document>>;

    /// Store documents under the revisions they already carry.
    ///
    /// An incoming document replaces the local one only if its revision
    /// wins. Returns the number of documents stored.
    async fn write_replicated(&self, docs: Vec<Document>) -> Result<usize>;

    /// Irreversibly delete the collection. The handle is unusable afterwards.
    async fn destroy(&self) -> Result<()>;
}

/// Opens named collections of one engine.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Engine name (e.g., "memory", "sqlite", "http").
    fn kind(&self) -> &str;

    /// Open or create a collection.
    async fn open(&self, name: &str) -> Result<Arc<dyn DocumentDatabase>>;
}

/// Current state of an id as seen by a write.
pub(crate) struct Existing<'a> {
    pub revision: &'a Revision,
    pub deleted: bool,
}

/// Generate a fresh revision of the given generation.
pub(crate) fn new_revision(generation: u64) -> Revision {
    Revision::new(generation, Uuid::new_v4().simple().to_string())
}

/// Validate an optimistic write and compute the next revision.
///
/// A tombstoned id may be recreated without a revision.
pub(crate) fn next_revision(
    id: &str,
    existing: Option<Existing<'_>>,
    incoming: Option<&Revision>,
) -> Result<Revision> {
    match (existing, incoming) {
        (None, None) => Ok(new_revision(1)),
        (None, Some(_)) => Err(Error::Conflict(format!(
            "Document {} does not exist at the given revision",
            id
        ))),
        (Some(current), None) if current.deleted => Ok(new_revision(current.revision.generation() + 1)),
        (Some(current), Some(rev)) if rev == current.revision => {
            Ok(new_revision(current.revision.generation() + 1))
        }
        (Some(_), _) => Err(Error::Conflict(format!("Document update conflict: {}", id))),
    }
}

/// Whether a replicated revision should replace the local one.
pub(crate) fn replicated_wins(local: Option<&Revision>, incoming: &Revision) -> bool {
    match local {
        None => true,
        Some(local) => incoming > local,
    }
}

/// Apply list options to documents already sorted ascending by id.
pub(crate) fn apply_list_options<I>(docs: I, options: &ListOptions) -> Vec<Document>
where
    I: IntoIterator<Item = Document>,
{
    let mut docs: Vec<Document> = docs.into_iter().collect();
    if options.descending {
        docs.reverse();
    }

    let in_range = |doc: &Document| match &options.start_key {
        Some(key) if options.descending => doc.id.as_str() <= key.as_str(),
        Some(key) => doc.id.as_str() >= key.as_str(),
        None => true,
    };

    docs.into_iter()
        .filter(in_range)
        .take(options.limit.unwrap_or(usize::MAX))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn docs(ids: &[&str]) -> Vec<Document> {
        ids.iter().map(|id| Document::new(*id, Map::new())).collect()
    }

    fn ids(docs: &[Document]) -> Vec<&str> {
        docs.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn test_list_options_descending_with_start() {
        let all = docs(&["a", "b", "c", "d"]);
        let opts = ListOptions::all().descending().start_key("c").limit(2);
        let out = apply_list_options(all, &opts);
        assert_eq!(ids(&out), vec!["c", "b"]);
    }

    #[test]
    fn test_list_options_ascending_with_start() {
        let all = docs(&["a", "b", "c", "d"]);
        let opts = ListOptions::all().start_key("b");
        let out = apply_list_options(all, &opts);
        assert_eq!(ids(&out), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_next_revision_rules() {
        let r1 = Revision::new(1, "aa");
        assert_eq!(next_revision("x", None, None).unwrap().generation(), 1);
        assert!(next_revision("x", None, Some(&r1)).is_err());

        let live = Existing { revision: &r1, deleted: false };
        assert!(next_revision("x", Some(live), None).unwrap_err().is_conflict());

        let live = Existing { revision: &r1, deleted: false };
        assert_eq!(next_revision("x", Some(live), Some(&r1)).unwrap().generation(), 2);

        let stale = Revision::new(1, "bb");
        let live = Existing { revision: &r1, deleted: false };
        assert!(next_revision("x", Some(live), Some(&stale)).is_err());

        let dead = Existing { revision: &r1, deleted: true };
        assert_eq!(next_revision("x", Some(dead), None).unwrap().generation(), 2);
    }

    #[test]
    fn test_replicated_wins() {
        let r1 = Revision::new(1, "aa");
        let r2 = Revision::new(2, "00");
        assert!(replicated_wins(None, &r1));
        assert!(replicated_wins(Some(&r1), &r2));
        assert!(!replicated_wins(Some(&r2), &r1));
        assert!(!replicated_wins(Some(&r2), &r2));
    }
}
