//! Plain and encrypted stores over one document collection.
//!
//! Both variants expose the same operations through [`Store`]. The encrypted
//! variant passes every document through the transform and hides the mark
//! document from callers.

use std::sync::Arc;
use tracing::{debug, info, warn};

use expenses_common::{Document, Error, Passphrase, Result, Revision};
use expenses_crypto::Cipher;
use expenses_storage::{Backend, BulkWriteOutcome, DocumentDatabase, ListOptions};

use crate::mark::{is_mark, mark_document, MARK_ID};
use crate::transform::{decrypt_doc, encrypt_doc, is_encrypted_shape};

/// Pass-through store over a plaintext collection.
pub struct PlainStore {
    backend: Arc<dyn Backend>,
    db: Arc<dyn DocumentDatabase>,
}

impl PlainStore {
    /// Open a plaintext store on the collection `name`.
    ///
    /// # Errors
    /// - `MaybeEncrypted` if the collection holds a mark document
    pub async fn open(backend: Arc<dyn Backend>, name: &str) -> Result<Self> {
        let db = backend.open(name).await?;
        match db.get(MARK_ID).await {
            Ok(_) => {
                warn!(store = %name, "Encryption mark found while opening without passphrase");
                Err(Error::MaybeEncrypted)
            }
            Err(e) if e.is_not_found() => {
                debug!(store = %name, "Opened plaintext store");
                Ok(Self { backend, db })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn put(&self, doc: Document) -> Result<Revision> {
        self.db.put(doc).await
    }

    pub async fn get(&self, id: &str) -> Result<Document> {
        self.db.get(id).await
    }

    pub async fn remove(&self, id: &str, revision: &Revision) -> Result<Revision> {
        self.db.remove(id, revision).await
    }

    pub async fn list(&self, options: ListOptions) -> Result<Vec<Document>> {
        self.db.list(options).await
    }

    pub async fn bulk_write(&self, docs: Vec<Document>) -> Result<Vec<BulkWriteOutcome>> {
        self.db.bulk_write(docs).await
    }
}

/// Store that encrypts every document body at rest.
pub struct EncryptedStore {
    backend: Arc<dyn Backend>,
    db: Arc<dyn DocumentDatabase>,
    cipher: Cipher,
}

impl EncryptedStore {
    /// Open an encrypted store on the collection `name`.
    ///
    /// An empty collection is claimed by writing the mark under
    /// `passphrase`. A non-empty one must already hold a mark that decrypts
    /// to the fixed payload.
    ///
    /// # Errors
    /// - `NotEmpty` if documents exist but no mark does
    /// - `NotEncrypted` if the mark is not in encrypted form
    /// - `InvalidPassphrase` if the mark does not decrypt to the fixed payload
    pub async fn open(backend: Arc<dyn Backend>, name: &str, passphrase: Passphrase) -> Result<Self> {
        let (store, unclaimed) = Self::validate(backend, name, passphrase).await?;
        if unclaimed {
            store.claim().await?;
        }
        Ok(store)
    }

    /// Check the collection against `passphrase` without writing to it.
    ///
    /// Returns the store and whether the collection is empty and still
    /// needs its mark.
    async fn validate(
        backend: Arc<dyn Backend>,
        name: &str,
        passphrase: Passphrase,
    ) -> Result<(Self, bool)> {
        let db = backend.open(name).await?;
        let store = Self {
            backend,
            db,
            cipher: Cipher::new(passphrase),
        };

        if store.db.info().await?.doc_count == 0 {
            return Ok((store, true));
        }

        let stored = match store.db.get(MARK_ID).await {
            Ok(doc) => doc,
            Err(e) if e.is_not_found() => {
                return Err(Error::NotEmpty(format!(
                    "{} has documents but no encryption mark",
                    name
                )))
            }
            Err(e) => return Err(e),
        };

        if !is_encrypted_shape(&stored) {
            warn!(store = %name, "Encryption mark is stored in plaintext");
            return Err(Error::NotEncrypted(format!(
                "Encryption mark of {} is not encrypted",
                name
            )));
        }

        match decrypt_doc(&store.cipher, stored) {
            Ok(mark) if is_mark(&mark) => {
                debug!(store = %name, "Opened encrypted store");
                Ok((store, false))
            }
            Ok(_) => {
                warn!(store = %name, "Encryption mark payload mismatch");
                Err(Error::InvalidPassphrase)
            }
            Err(Error::Decryption(_)) | Err(Error::Serialization(_)) => Err(Error::InvalidPassphrase),
            Err(e) => Err(e),
        }
    }

    async fn claim(&self) -> Result<()> {
        let mark = encrypt_doc(&self.cipher, mark_document())?;
        self.db.put(mark).await?;
        info!(store = %self.db.name(), "Initialized encrypted store");
        Ok(())
    }

    /// Whether `passphrase` is the one this store is keyed with.
    pub fn is_passphrase(&self, passphrase: &Passphrase) -> bool {
        self.cipher.is_passphrase(passphrase)
    }

    pub fn passphrase(&self) -> &Passphrase {
        self.cipher.passphrase()
    }

    pub async fn put(&self, doc: Document) -> Result<Revision> {
        reject_mark(&doc.id)?;
        self.db.put(encrypt_doc(&self.cipher, doc)?).await
    }

    pub async fn get(&self, id: &str) -> Result<Document> {
        if id == MARK_ID {
            return Err(Error::NotFound(format!("Document not found: {}", id)));
        }
        decrypt_doc(&self.cipher, self.db.get(id).await?)
    }

    pub async fn remove(&self, id: &str, revision: &Revision) -> Result<Revision> {
        if id == MARK_ID {
            return Err(Error::NotFound(format!("Document not found: {}", id)));
        }
        self.db.remove(id, revision).await
    }

    /// List documents with the mark filtered out.
    ///
    /// One extra row is requested so a mark inside the window does not
    /// shorten the page.
    pub async fn list(&self, options: ListOptions) -> Result<Vec<Document>> {
        let limit = options.limit;
        let options = ListOptions {
            limit: limit.map(|n| n.saturating_add(1)),
            ..options
        };

        let mut docs = self
            .db
            .list(options)
            .await?
            .into_iter()
            .filter(|doc| doc.id != MARK_ID)
            .map(|doc| decrypt_doc(&self.cipher, doc))
            .collect::<Result<Vec<_>>>()?;
        if let Some(limit) = limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    pub async fn bulk_write(&self, docs: Vec<Document>) -> Result<Vec<BulkWriteOutcome>> {
        let encrypted = docs
            .into_iter()
            .map(|doc| {
                reject_mark(&doc.id)?;
                encrypt_doc(&self.cipher, doc)
            })
            .collect::<Result<Vec<_>>>()?;
        self.db.bulk_write(encrypted).await
    }
}

fn reject_mark(id: &str) -> Result<()> {
    if id == MARK_ID {
        return Err(Error::InvalidInput(format!("Document id '{}' is reserved", id)));
    }
    Ok(())
}

/// A store over one collection, plaintext or encrypted.
pub enum Store {
    Plain(PlainStore),
    Encrypted(EncryptedStore),
}

impl Store {
    /// Open the collection `name`, encrypted when a passphrase is given.
    pub async fn open(
        backend: Arc<dyn Backend>,
        name: &str,
        passphrase: Option<Passphrase>,
    ) -> Result<Self> {
        match passphrase {
            Some(passphrase) => Ok(Store::Encrypted(
                EncryptedStore::open(backend, name, passphrase).await?,
            )),
            None => Ok(Store::Plain(PlainStore::open(backend, name).await?)),
        }
    }

    /// Open the collection `name` without claiming it.
    ///
    /// Nothing is written until [`ValidatedStore::claim`], so a caller
    /// opening several collections can check all of them first.
    pub async fn validate(
        backend: Arc<dyn Backend>,
        name: &str,
        passphrase: Option<Passphrase>,
    ) -> Result<ValidatedStore> {
        match passphrase {
            Some(passphrase) => {
                let (store, unclaimed) = EncryptedStore::validate(backend, name, passphrase).await?;
                Ok(ValidatedStore {
                    store: Store::Encrypted(store),
                    unclaimed,
                })
            }
            None => Ok(ValidatedStore {
                store: Store::Plain(PlainStore::open(backend, name).await?),
                unclaimed: false,
            }),
        }
    }

    fn backend(&self) -> &Arc<dyn Backend> {
        match self {
            Store::Plain(store) => &store.backend,
            Store::Encrypted(store) => &store.backend,
        }
    }

    /// The underlying collection, as stored at rest.
    pub fn database(&self) -> &Arc<dyn DocumentDatabase> {
        match self {
            Store::Plain(store) => &store.db,
            Store::Encrypted(store) => &store.db,
        }
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        self.database().name()
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Store::Encrypted(_))
    }

    /// Passphrase of an encrypted store.
    pub fn passphrase(&self) -> Option<&Passphrase> {
        match self {
            Store::Plain(_) => None,
            Store::Encrypted(store) => Some(store.passphrase()),
        }
    }

    pub async fn put(&self, doc: Document) -> Result<Revision> {
        match self {
            Store::Plain(store) => store.put(doc).await,
            Store::Encrypted(store) => store.put(doc).await,
        }
    }

    pub async fn get(&self, id: &str) -> Result<Document> {
        match self {
            Store::Plain(store) => store.get(id).await,
            Store::Encrypted(store) => store.get(id).await,
        }
    }

    pub async fn remove(&self, id: &str, revision: &Revision) -> Result<Revision> {
        match self {
            Store::Plain(store) => store.remove(id, revision).await,
            Store::Encrypted(store) => store.remove(id, revision).await,
        }
    }

    pub async fn list(&self, options: ListOptions) -> Result<Vec<Document>> {
        match self {
            Store::Plain(store) => store.list(options).await,
            Store::Encrypted(store) => store.list(options).await,
        }
    }

    pub async fn bulk_write(&self, docs: Vec<Document>) -> Result<Vec<BulkWriteOutcome>> {
        match self {
            Store::Plain(store) => store.bulk_write(docs).await,
            Store::Encrypted(store) => store.bulk_write(docs).await,
        }
    }

    /// Irreversibly delete the collection.
    pub async fn destroy(self) -> Result<()> {
        info!(store = %self.name(), "Destroying store");
        self.database().destroy().await
    }

    /// Encrypt this store under `passphrase`.
    ///
    /// A plaintext store is encrypted, an encrypted store under another
    /// passphrase is re-keyed. Re-encrypting under the current passphrase
    /// returns the store unchanged.
    pub async fn encrypt(self, passphrase: Passphrase) -> Result<Store> {
        if let Store::Encrypted(store) = &self {
            if store.is_passphrase(&passphrase) {
                return Ok(self);
            }
        }
        self.rotate(Some(passphrase)).await
    }

    /// Decrypt this store into a plaintext one. A plaintext store is
    /// returned unchanged.
    pub async fn decrypt(self) -> Result<Store> {
        match self {
            Store::Plain(_) => Ok(self),
            Store::Encrypted(_) => self.rotate(None).await,
        }
    }

    /// Rewrite every document into a fresh collection of the same name.
    async fn rotate(self, passphrase: Option<Passphrase>) -> Result<Store> {
        let docs = self.snapshot().await?;
        self.rebuild(docs, passphrase).await
    }

    /// Read every document in plaintext, without revisions.
    ///
    /// Nothing is modified; a document that fails to decrypt fails the
    /// whole read.
    pub async fn snapshot(&self) -> Result<Vec<Document>> {
        Ok(self
            .list(ListOptions::all())
            .await?
            .into_iter()
            .map(Document::without_revision)
            .collect())
    }

    /// Destroy the collection and write `docs` into a fresh one under
    /// `passphrase`.
    ///
    /// # Errors
    /// - `Storage` if fewer documents were written than were given; the
    ///   collection then holds only the written ones
    pub async fn rebuild(self, docs: Vec<Document>, passphrase: Option<Passphrase>) -> Result<Store> {
        let expected = docs.len();
        let backend = self.backend().clone();
        let name = self.name().to_string();
        info!(
            store = %name,
            documents = expected,
            encrypted = passphrase.is_some(),
            "Rotating store"
        );

        self.destroy().await?;
        let store = Store::open(backend, &name, passphrase).await?;

        if expected > 0 {
            let written = store
                .bulk_write(docs)
                .await?
                .iter()
                .filter(|outcome| outcome.is_written())
                .count();
            if written != expected {
                return Err(Error::Storage(format!(
                    "Rotation of {} wrote {} of {} documents",
                    name, written, expected
                )));
            }
        }

        info!(store = %name, encrypted = store.is_encrypted(), "Rotation complete");
        Ok(store)
    }
}

/// A store whose collection has been checked but not yet written to.
pub struct ValidatedStore {
    store: Store,
    unclaimed: bool,
}

impl ValidatedStore {
    /// Whether opening will write the encryption mark into an empty
    /// collection.
    pub fn is_unclaimed(&self) -> bool {
        self.unclaimed
    }

    /// Write the mark if the collection still needs one.
    pub async fn claim(self) -> Result<Store> {
        if self.unclaimed {
            if let Store::Encrypted(store) = &self.store {
                store.claim().await?;
            }
        }
        Ok(self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::CRYPT_FIELD;
    use expenses_storage::MemoryBackend;
    use serde_json::{json, Map};

    fn backend() -> Arc<dyn Backend> {
        Arc::new(MemoryBackend::new())
    }

    fn passphrase(value: &str) -> Passphrase {
        Passphrase::new(value).unwrap()
    }

    fn doc(id: &str, n: i64) -> Document {
        let mut body = Map::new();
        body.insert("n".to_string(), json!(n));
        Document::new(id, body)
    }

    #[tokio::test]
    async fn test_plain_open_empty() {
        let store = Store::open(backend(), "c", None).await.unwrap();
        assert!(!store.is_encrypted());
        assert!(store.passphrase().is_none());
    }

    #[tokio::test]
    async fn test_encrypted_open_writes_mark() {
        let backend = backend();
        let store = Store::open(backend.clone(), "c", Some(passphrase("p"))).await.unwrap();
        assert!(store.is_encrypted());

        let raw = backend.open("c").await.unwrap();
        let mark = raw.get(MARK_ID).await.unwrap();
        assert!(is_encrypted_shape(&mark));
        assert!(store.list(ListOptions::all()).await.unwrap().is_empty());
        assert!(store.get(MARK_ID).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_plain_open_of_encrypted_is_maybe_encrypted() {
        let backend = backend();
        Store::open(backend.clone(), "c", Some(passphrase("p"))).await.unwrap();
        let err = Store::open(backend, "c", None).await.err().unwrap();
        assert!(matches!(err, Error::MaybeEncrypted));
    }

    #[tokio::test]
    async fn test_wrong_passphrase() {
        let backend = backend();
        Store::open(backend.clone(), "c", Some(passphrase("p1"))).await.unwrap();
        let err = Store::open(backend.clone(), "c", Some(passphrase("p2")))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidPassphrase));
        assert!(Store::open(backend, "c", Some(passphrase("p1"))).await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_does_not_write_mark() {
        let backend = backend();
        let validated = Store::validate(backend.clone(), "c", Some(passphrase("p")))
            .await
            .unwrap();
        assert!(validated.is_unclaimed());
        assert_eq!(backend.open("c").await.unwrap().info().await.unwrap().doc_count, 0);

        let store = validated.claim().await.unwrap();
        assert!(store.is_encrypted());
        assert!(backend.open("c").await.unwrap().get(MARK_ID).await.is_ok());

        let reopened = Store::validate(backend, "c", Some(passphrase("p"))).await.unwrap();
        assert!(!reopened.is_unclaimed());
    }

    #[tokio::test]
    async fn test_snapshot_failure_leaves_collection() {
        let backend = backend();
        let store = Store::open(backend.clone(), "c", Some(passphrase("p"))).await.unwrap();
        store.put(doc("a", 1)).await.unwrap();

        let raw = backend.open("c").await.unwrap();
        let mut stored = raw.get("a").await.unwrap();
        let mut crypt = stored.get(CRYPT_FIELD).and_then(|v| v.as_str()).unwrap().to_string();
        let last = crypt.pop().unwrap();
        crypt.push(if last == '0' { '1' } else { '0' });
        stored.body.insert(CRYPT_FIELD.to_string(), json!(crypt));
        raw.put(stored).await.unwrap();

        let err = store.encrypt(passphrase("p2")).await.err().unwrap();
        assert!(matches!(err, Error::Decryption(_)));
        assert!(Store::open(backend, "c", Some(passphrase("p"))).await.is_ok());
    }

    #[tokio::test]
    async fn test_non_empty_without_mark() {
        let backend = backend();
        let plain = Store::open(backend.clone(), "c", None).await.unwrap();
        plain.put(doc("a", 1)).await.unwrap();

        let err = Store::open(backend, "c", Some(passphrase("p"))).await.err().unwrap();
        assert!(matches!(err, Error::NotEmpty(_)));
    }

    #[tokio::test]
    async fn test_plaintext_mark_is_not_encrypted() {
        let backend = backend();
        let raw = backend.open("c").await.unwrap();
        raw.put(mark_document()).await.unwrap();

        let err = Store::open(backend, "c", Some(passphrase("p"))).await.err().unwrap();
        assert!(matches!(err, Error::NotEncrypted(_)));
    }

    #[tokio::test]
    async fn test_mark_with_wrong_payload() {
        let backend = backend();
        let raw = backend.open("c").await.unwrap();
        let cipher = Cipher::new(passphrase("p"));
        let forged = encrypt_doc(&cipher, doc(MARK_ID, 1)).unwrap();
        raw.put(forged).await.unwrap();

        let err = Store::open(backend, "c", Some(passphrase("p"))).await.err().unwrap();
        assert!(matches!(err, Error::InvalidPassphrase));
    }

    #[tokio::test]
    async fn test_encrypted_documents_at_rest() {
        let backend = backend();
        let store = Store::open(backend.clone(), "c", Some(passphrase("p"))).await.unwrap();
        let revision = store.put(doc("a", 42)).await.unwrap();

        let raw = backend.open("c").await.unwrap().get("a").await.unwrap();
        assert!(is_encrypted_shape(&raw));
        assert_eq!(raw.revision, Some(revision.clone()));

        let read = store.get("a").await.unwrap();
        assert_eq!(read.get("n"), Some(&json!(42)));
        assert_eq!(read.revision, Some(revision));
    }

    #[tokio::test]
    async fn test_encrypted_list_hides_mark() {
        let store = Store::open(backend(), "c", Some(passphrase("p"))).await.unwrap();
        // "f" sorts after "encryption-mark", "a" before it.
        for id in ["a", "f", "g"] {
            store.put(doc(id, 0)).await.unwrap();
        }

        let ids = |docs: Vec<Document>| docs.into_iter().map(|d| d.id).collect::<Vec<_>>();
        let page = store
            .list(ListOptions::all().descending().limit(3))
            .await
            .unwrap();
        assert_eq!(ids(page), vec!["g", "f", "a"]);

        let page = store
            .list(ListOptions::all().start_key("f").descending().limit(2))
            .await
            .unwrap();
        assert_eq!(ids(page), vec!["f", "a"]);
    }

    #[tokio::test]
    async fn test_mark_id_is_reserved() {
        let store = Store::open(backend(), "c", Some(passphrase("p"))).await.unwrap();
        let err = store.put(doc(MARK_ID, 1)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_encrypt_then_decrypt_roundtrip() {
        let backend = backend();
        let store = Store::open(backend.clone(), "c", None).await.unwrap();
        store.bulk_write(vec![doc("a", 1), doc("b", 2)]).await.unwrap();

        let store = store.encrypt(passphrase("p")).await.unwrap();
        assert!(store.is_encrypted());
        let raw = backend.open("c").await.unwrap().get("a").await.unwrap();
        assert!(is_encrypted_shape(&raw));

        let store = store.decrypt().await.unwrap();
        assert!(!store.is_encrypted());
        let docs = store.list(ListOptions::all()).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].get("n"), Some(&json!(2)));
        assert!(backend.open("c").await.unwrap().get(MARK_ID).await.is_err());
    }

    #[tokio::test]
    async fn test_rekey() {
        let backend = backend();
        let store = Store::open(backend.clone(), "c", Some(passphrase("p1"))).await.unwrap();
        store.put(doc("a", 1)).await.unwrap();

        let store = store.encrypt(passphrase("p2")).await.unwrap();
        assert!(store.passphrase() == Some(&passphrase("p2")));
        drop(store);

        let err = Store::open(backend.clone(), "c", Some(passphrase("p1")))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidPassphrase));

        let store = Store::open(backend, "c", Some(passphrase("p2"))).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().get("n"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_encrypt_same_passphrase_is_noop() {
        let backend = backend();
        let store = Store::open(backend.clone(), "c", Some(passphrase("p"))).await.unwrap();
        let revision = store.put(doc("a", 1)).await.unwrap();

        let store = store.encrypt(passphrase("p")).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().revision, Some(revision));
    }

    #[tokio::test]
    async fn test_decrypt_plain_is_noop() {
        let store = Store::open(backend(), "c", None).await.unwrap();
        let revision = store.put(doc("a", 1)).await.unwrap();

        let store = store.decrypt().await.unwrap();
        assert_eq!(store.get("a").await.unwrap().revision, Some(revision));
    }
}
