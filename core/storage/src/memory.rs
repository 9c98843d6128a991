//! In-memory document database.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::database::{
    apply_list_options, new_revision, next_revision, replicated_wins, Backend, BulkWriteOutcome,
    DatabaseInfo, DocumentDatabase, Existing, ListOptions,
};
use expenses_common::{Document, Error, Result, Revision};

type Collections = Arc<Mutex<HashMap<String, Arc<MemoryDatabase>>>>;

/// In-memory collection.
///
/// Useful for testing and for in-process replication targets. All data is
/// lost when the last handle is dropped.
pub struct MemoryDatabase {
    name: String,
    docs: RwLock<BTreeMap<String, Document>>,
    destroyed: AtomicBool,
    registry: Option<Collections>,
}

impl MemoryDatabase {
    /// Create a standalone collection not registered with any backend.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_registry(name, None)
    }

    fn with_registry(name: impl Into<String>, registry: Option<Collections>) -> Self {
        Self {
            name: name.into(),
            docs: RwLock::new(BTreeMap::new()),
            destroyed: AtomicBool::new(false),
            registry,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(Error::NotPermitted(format!(
                "Database {} has been destroyed",
                self.name
            )));
        }
        Ok(())
    }

    fn write_one(docs: &mut BTreeMap<String, Document>, doc: Document) -> Result<Revision> {
        let existing = docs.get(&doc.id).and_then(|current| {
            current.revision.as_ref().map(|revision| Existing {
                revision,
                deleted: current.deleted,
            })
        });
        let revision = next_revision(&doc.id, existing, doc.revision.as_ref())?;

        let stored = doc.with_revision(Some(revision.clone()));
        docs.insert(stored.id.clone(), stored);
        Ok(revision)
    }
}

#[async_trait]
impl DocumentDatabase for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn info(&self) -> Result<DatabaseInfo> {
        self.ensure_open()?;
        let docs = self.docs.read().await;
        Ok(DatabaseInfo {
            name: self.name.clone(),
            doc_count: docs.values().filter(|d| !d.deleted).count() as u64,
        })
    }

    async fn get(&self, id: &str) -> Result<Document> {
        self.ensure_open()?;
        match self.docs.read().await.get(id) {
            Some(doc) if !doc.deleted => Ok(doc.clone()),
            _ => Err(Error::NotFound(format!("Document not found: {}", id))),
        }
    }

    async fn put(&self, doc: Document) -> Result<Revision> {
        self.ensure_open()?;
        debug!(db = %self.name, id = %doc.id, "put");
        let mut docs = self.docs.write().await;
        Self::write_one(&mut docs, doc)
    }

    async fn remove(&self, id: &str, revision: &Revision) -> Result<Revision> {
        self.ensure_open()?;
        debug!(db = %self.name, id = %id, "remove");
        let mut docs = self.docs.write().await;

        let current = match docs.get(id) {
            Some(doc) if !doc.deleted => doc,
            _ => return Err(Error::NotFound(format!("Document not found: {}", id))),
        };
        if current.revision.as_ref() != Some(revision) {
            return Err(Error::Conflict(format!("Document update conflict: {}", id)));
        }

        let next = new_revision(revision.generation() + 1);
        docs.insert(id.to_string(), Document::tombstone(id, next.clone()));
        Ok(next)
    }

    async fn list(&self, options: ListOptions) -> Result<Vec<Document>> {
        self.ensure_open()?;
        let docs = self.docs.read().await;
        let live = docs.values().filter(|d| !d.deleted).cloned();
        Ok(apply_list_options(live, &options))
    }

    async fn bulk_write(&self, docs: Vec<Document>) -> Result<Vec<BulkWriteOutcome>> {
        self.ensure_open()?;
        debug!(db = %self.name, count = docs.len(), "bulk write");
        let mut stored = self.docs.write().await;

        let mut outcomes = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = doc.id.clone();
            match Self::write_one(&mut stored, doc) {
                Ok(revision) => outcomes.push(BulkWriteOutcome::Written { id, revision }),
                Err(Error::Conflict(_)) => outcomes.push(BulkWriteOutcome::Conflict { id }),
                Err(e) => return Err(e),
            }
        }
        Ok(outcomes)
    }

    async fn changes(&self) -> Result<Vec<Document>> {
        self.ensure_open()?;
        Ok(self.docs.read().await.values().cloned().collect())
    }

    async fn write_replicated(&self, docs: Vec<Document>) -> Result<usize> {
        self.ensure_open()?;
        let mut stored = self.docs.write().await;

        let mut written = 0;
        for doc in docs {
            let incoming = doc.revision.clone().ok_or_else(|| {
                Error::InvalidInput(format!("Replicated document {} has no revision", doc.id))
            })?;
            let local = stored.get(&doc.id).and_then(|d| d.revision.as_ref());
            if replicated_wins(local, &incoming) {
                stored.insert(doc.id.clone(), doc);
                written += 1;
            }
        }
        Ok(written)
    }

    async fn destroy(&self) -> Result<()> {
        self.ensure_open()?;
        self.destroyed.store(true, Ordering::Release);
        self.docs.write().await.clear();

        if let Some(registry) = &self.registry {
            registry.lock().await.remove(&self.name);
        }
        debug!(db = %self.name, "destroyed");
        Ok(())
    }
}

/// Backend of named in-memory collections.
///
/// Opening the same name twice from clones of one backend returns the same
/// collection until it is destroyed.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    collections: Collections,
}

impl MemoryBackend {
    /// Create a backend with no collections.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn kind(&self) -> &str {
        "memory"
    }

    async fn open(&self, name: &str) -> Result<Arc<dyn DocumentDatabase>> {
        let mut collections = self.collections.lock().await;
        let db = collections
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(MemoryDatabase::with_registry(
                    name,
                    Some(self.collections.clone()),
                ))
            })
            .clone();
        Ok(db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn doc(id: &str, value: Value) -> Document {
        let mut body = Map::new();
        body.insert("value".to_string(), value);
        Document::new(id, body)
    }

    #[tokio::test]
    async fn test_put_get() {
        let db = MemoryDatabase::new("test");
        let rev = db.put(doc("a", json!(1))).await.unwrap();
        assert_eq!(rev.generation(), 1);

        let read = db.get("a").await.unwrap();
        assert_eq!(read.revision, Some(rev));
        assert_eq!(read.get("value"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let db = MemoryDatabase::new("test");
        assert!(db.get("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_stale_revision_conflicts() {
        let db = MemoryDatabase::new("test");
        let rev1 = db.put(doc("a", json!(1))).await.unwrap();
        db.put(doc("a", json!(2)).with_revision(Some(rev1.clone())))
            .await
            .unwrap();

        let err = db
            .put(doc("a", json!(3)).with_revision(Some(rev1)))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let err = db.put(doc("a", json!(4))).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_remove_hides_document() {
        let db = MemoryDatabase::new("test");
        let rev = db.put(doc("a", json!(1))).await.unwrap();
        db.remove("a", &rev).await.unwrap();

        assert!(db.get("a").await.unwrap_err().is_not_found());
        assert_eq!(db.info().await.unwrap().doc_count, 0);
        assert!(db.list(ListOptions::all()).await.unwrap().is_empty());

        let changes = db.changes().await.unwrap();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].deleted);
    }

    #[tokio::test]
    async fn test_bulk_write_reports_conflicts() {
        let db = MemoryDatabase::new("test");
        db.put(doc("a", json!(1))).await.unwrap();

        let outcomes = db
            .bulk_write(vec![doc("a", json!(2)), doc("b", json!(3))])
            .await
            .unwrap();
        assert_eq!(outcomes[0], BulkWriteOutcome::Conflict { id: "a".into() });
        assert!(outcomes[1].is_written());
    }

    #[tokio::test]
    async fn test_list_descending_limit() {
        let db = MemoryDatabase::new("test");
        for id in ["e1", "e2", "e3"] {
            db.put(doc(id, json!(id))).await.unwrap();
        }
        let rows = db
            .list(ListOptions::all().descending().limit(2))
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["e3", "e2"]);
    }

    #[tokio::test]
    async fn test_write_replicated_keeps_winner() {
        let db = MemoryDatabase::new("test");
        db.put(doc("a", json!("local"))).await.unwrap();

        let incoming = doc("a", json!("remote")).with_revision(Some(Revision::new(5, "ff")));
        assert_eq!(db.write_replicated(vec![incoming]).await.unwrap(), 1);
        assert_eq!(db.get("a").await.unwrap().get("value"), Some(&json!("remote")));

        let older = doc("a", json!("old")).with_revision(Some(Revision::new(2, "ff")));
        assert_eq!(db.write_replicated(vec![older]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_backend_shares_and_destroys() {
        let backend = MemoryBackend::new();
        let first = backend.open("shared").await.unwrap();
        first.put(doc("a", json!(1))).await.unwrap();

        let second = backend.clone().open("shared").await.unwrap();
        assert!(second.get("a").await.is_ok());

        first.destroy().await.unwrap();
        assert!(second.get("a").await.is_err());

        let fresh = backend.open("shared").await.unwrap();
        assert_eq!(fresh.info().await.unwrap().doc_count, 0);
    }
}
