//! Revision conflict resolution between two collections.

use std::collections::HashMap;

use expenses_common::{Document, Revision};

/// Latest known revision of every document id on one side.
#[derive(Debug, Default)]
pub struct RevisionIndex {
    revisions: HashMap<String, Revision>,
}

impl RevisionIndex {
    /// Build an index from a change feed.
    pub fn from_changes(changes: &[Document]) -> Self {
        let revisions = changes
            .iter()
            .filter_map(|doc| doc.revision.clone().map(|rev| (doc.id.clone(), rev)))
            .collect();
        Self { revisions }
    }

    /// Whether a document carrying `revision` would replace what is held.
    pub fn is_superseded_by(&self, id: &str, revision: &Revision) -> bool {
        match self.revisions.get(id) {
            Some(held) => revision > held,
            None => true,
        }
    }
}

/// Select the documents from `source` that win against `target`.
///
/// A document wins when the target has no revision for its id or holds a
/// lower one. Documents without a revision never replicate. Tombstones are
/// selected like any other document so deletions propagate.
pub fn winning_changes(source: Vec<Document>, target: &RevisionIndex) -> Vec<Document> {
    source
        .into_iter()
        .filter(|doc| match &doc.revision {
            Some(revision) => target.is_superseded_by(&doc.id, revision),
            None => false,
        })
        .collect()
}
