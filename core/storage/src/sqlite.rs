//! SQLite-backed document database.
//!
//! Each collection lives in its own SQLite file under the backend root, so
//! destroying a collection removes exactly one file.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::database::{
    new_revision, next_revision, replicated_wins, Backend, BulkWriteOutcome, DatabaseInfo,
    DocumentDatabase, Existing, ListOptions,
};
use expenses_common::{Document, Error, Result, Revision};

/// File extension of collection files.
const FILE_EXTENSION: &str = "sqlite";

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(format!("SQLite error: {}", e))
}

/// A collection stored in a single SQLite file.
pub struct SqliteDatabase {
    name: String,
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl SqliteDatabase {
    /// Open or create the collection file at `path`.
    pub fn open(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(storage_err)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            name: name.into(),
            path,
            conn: Mutex::new(Some(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY NOT NULL,
                rev TEXT NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                body TEXT NOT NULL
            );
            "#,
        )
        .map_err(storage_err)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| {
            Error::NotPermitted(format!("Database {} has been destroyed", self.name))
        })?;
        f(conn)
    }

    fn row_to_document(row: &Row<'_>) -> rusqlite::Result<(String, String, bool, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get::<_, i64>(2)? != 0, row.get(3)?))
    }

    fn decode((id, rev, deleted, body): (String, String, bool, String)) -> Result<Document> {
        let body: Map<String, Value> = serde_json::from_str(&body)?;
        Ok(Document {
            id,
            revision: Some(Revision::parse(rev)?),
            deleted,
            body,
        })
    }

    fn current(conn: &Connection, id: &str) -> Result<Option<(Revision, bool)>> {
        let row = conn
            .query_row(
                "SELECT rev, deleted FROM documents WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0)),
            )
            .optional()
            .map_err(storage_err)?;

        row.map(|(rev, deleted)| Ok((Revision::parse(rev)?, deleted)))
            .transpose()
    }

    fn store(conn: &Connection, doc: &Document, revision: &Revision) -> Result<()> {
        let body = serde_json::to_string(&doc.body)?;
        let deleted = i64::from(doc.deleted);
        conn.execute(
            "INSERT OR REPLACE INTO documents (id, rev, deleted, body) VALUES (?1, ?2, ?3, ?4)",
            params![doc.id, revision.as_str(), deleted, body],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn write_one(conn: &Connection, doc: &Document) -> Result<Revision> {
        let current = Self::current(conn, &doc.id)?;
        let existing = current.as_ref().map(|(revision, deleted)| Existing {
            revision,
            deleted: *deleted,
        });
        let revision = next_revision(&doc.id, existing, doc.revision.as_ref())?;
        Self::store(conn, doc, &revision)?;
        Ok(revision)
    }
}

#[async_trait]
impl DocumentDatabase for SqliteDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn info(&self) -> Result<DatabaseInfo> {
        let name = self.name.clone();
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM documents WHERE deleted = 0", [], |row| {
                    row.get(0)
                })
                .map_err(storage_err)?;
            Ok(DatabaseInfo {
                name,
                doc_count: count as u64,
            })
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Document> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, rev, deleted, body FROM documents WHERE id = ?1 AND deleted = 0",
                    params![id],
                    Self::row_to_document,
                )
                .optional()
                .map_err(storage_err)?;

            match row {
                Some(row) => Self::decode(row),
                None => Err(Error::NotFound(format!("Document not found: {}", id))),
            }
        })
        .await
    }

    async fn put(&self, doc: Document) -> Result<Revision> {
        debug!(db = %self.name, id = %doc.id, "put");
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(storage_err)?;
            let revision = Self::write_one(&tx, &doc)?;
            tx.commit().map_err(storage_err)?;
            Ok(revision)
        })
        .await
    }

    async fn remove(&self, id: &str, revision: &Revision) -> Result<Revision> {
        debug!(db = %self.name, id = %id, "remove");
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(storage_err)?;
            match Self::current(&tx, id)? {
                Some((current, false)) if &current == revision => {}
                Some((_, false)) => {
                    return Err(Error::Conflict(format!("Document update conflict: {}", id)))
                }
                _ => return Err(Error::NotFound(format!("Document not found: {}", id))),
            }

            let next = new_revision(revision.generation() + 1);
            Self::store(&tx, &Document::tombstone(id, next.clone()), &next)?;
            tx.commit().map_err(storage_err)?;
            Ok(next)
        })
        .await
    }

    async fn list(&self, options: ListOptions) -> Result<Vec<Document>> {
        self.with_conn(|conn| {
            let (cmp, order) = if options.descending {
                ("<=", "DESC")
            } else {
                (">=", "ASC")
            };
            let sql = format!(
                "SELECT id, rev, deleted, body FROM documents \
                 WHERE deleted = 0 AND (?1 IS NULL OR id {} ?1) \
                 ORDER BY id {} LIMIT ?2",
                cmp, order
            );
            let limit = options.limit.map(|l| l as i64).unwrap_or(-1);

            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(params![options.start_key, limit], Self::row_to_document)
                .map_err(storage_err)?;

            let docs: Result<Vec<Document>> = rows
                .map(|row| row.map_err(storage_err).and_then(Self::decode))
                .collect();
            docs
        })
        .await
    }

    async fn bulk_write(&self, docs: Vec<Document>) -> Result<Vec<BulkWriteOutcome>> {
        debug!(db = %self.name, count = docs.len(), "bulk write");
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(storage_err)?;
            let mut outcomes = Vec::with_capacity(docs.len());
            for doc in &docs {
                let id = doc.id.clone();
                match Self::write_one(&tx, doc) {
                    Ok(revision) => outcomes.push(BulkWriteOutcome::Written { id, revision }),
                    Err(Error::Conflict(_)) => outcomes.push(BulkWriteOutcome::Conflict { id }),
                    Err(e) => return Err(e),
                }
            }
            tx.commit().map_err(storage_err)?;
            Ok(outcomes)
        })
        .await
    }

    async fn changes(&self) -> Result<Vec<Document>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, rev, deleted, body FROM documents ORDER BY id ASC")
                .map_err(storage_err)?;
            let rows = stmt
                .query_map([], Self::row_to_document)
                .map_err(storage_err)?;
            let docs: Result<Vec<Document>> = rows
                .map(|row| row.map_err(storage_err).and_then(Self::decode))
                .collect();
            docs
        })
        .await
    }

    async fn write_replicated(&self, docs: Vec<Document>) -> Result<usize> {
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(storage_err)?;
            let mut written = 0;
            for doc in &docs {
                let incoming = doc.revision.as_ref().ok_or_else(|| {
                    Error::InvalidInput(format!("Replicated document {} has no revision", doc.id))
                })?;
                let local = Self::current(&tx, &doc.id)?.map(|(rev, _)| rev);
                if replicated_wins(local.as_ref(), incoming) {
                    Self::store(&tx, doc, incoming)?;
                    written += 1;
                }
            }
            tx.commit().map_err(storage_err)?;
            Ok(written)
        })
        .await
    }

    async fn destroy(&self) -> Result<()> {
        let conn = self.conn.lock().await.take().ok_or_else(|| {
            Error::NotPermitted(format!("Database {} has been destroyed", self.name))
        })?;
        conn.close().map_err(|(_, e)| storage_err(e))?;

        if tokio::fs::try_exists(&self.path).await? {
            tokio::fs::remove_file(&self.path).await?;
        }
        info!(db = %self.name, "Destroyed SQLite collection");
        Ok(())
    }
}

/// Backend storing each collection as `<root>/<name>.sqlite`.
pub struct SqliteBackend {
    root: PathBuf,
}

impl SqliteBackend {
    /// Create a backend rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    /// - Permission denied creating the root
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }
        Ok(Self { root })
    }

    /// File path of a collection.
    pub fn collection_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(Error::InvalidInput(format!(
                "Invalid collection name: {}",
                name
            )));
        }
        Ok(self.root.join(format!("{}.{}", name, FILE_EXTENSION)))
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn kind(&self) -> &str {
        "sqlite"
    }

    async fn open(&self, name: &str) -> Result<Arc<dyn DocumentDatabase>> {
        let path = self.collection_path(name)?;
        debug!(path = %path.display(), "Opening SQLite collection");
        Ok(Arc::new(SqliteDatabase::open(name, path)?))
    }
}
