//! Store manager owning the settings and ledger stores.

use std::sync::Arc;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::cursor::{Page, PageCursor};
use crate::ledger::{LedgerEntry, Settings, SETTINGS_ID};
use crate::store::Store;
use expenses_common::{Error, Passphrase, Result, Revision};
use expenses_storage::{
    resolve_backend, Backend, BulkWriteOutcome, Credentials, DocumentDatabase, HttpBackend,
    ListOptions,
};
use expenses_sync::ReplicationReport;

/// Outcome of opening the stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitResponse {
    /// No settings saved yet.
    FirstRun,
    /// Stores are open and settings exist.
    Ok(Settings),
    /// Stores are encrypted; open them with a passphrase.
    Encrypted,
}

/// Peer for a replication pass.
pub enum RemoteDescriptor {
    /// An already open collection.
    Direct(Arc<dyn DocumentDatabase>),
    /// A collection of the manager's own backend, by name.
    Alias(String),
    /// A CouchDB-compatible database URL.
    Url {
        url: String,
        credentials: Option<Credentials>,
    },
}

impl RemoteDescriptor {
    /// Database URL with basic-auth credentials.
    pub fn url(url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        RemoteDescriptor::Url {
            url: url.into(),
            credentials: Some(Credentials::new(username, password)),
        }
    }
}

struct StorePair {
    settings: Store,
    ledger: Store,
}

/// Owner of the settings and ledger stores.
///
/// Both stores always share one encryption state and passphrase. Rotation
/// and deletion replace them together; callers must serialize mutating
/// calls on one manager.
pub struct StoreManager {
    backend: Arc<dyn Backend>,
    config: StoreConfig,
    stores: Option<StorePair>,
}

impl StoreManager {
    /// Create a manager over an already resolved backend. No store is open.
    pub fn new(backend: Arc<dyn Backend>, config: StoreConfig) -> Self {
        Self {
            backend,
            config,
            stores: None,
        }
    }

    /// Create a manager over the configured engine.
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Unknown backend or invalid backend configuration
    pub fn from_config(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let backend = resolve_backend(&config.backend, &config.backend_config)?;
        Ok(Self::new(backend, config))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Whether the stores are open.
    pub fn is_open(&self) -> bool {
        self.stores.is_some()
    }

    /// Whether the open stores are encrypted.
    pub fn is_encrypted(&self) -> Result<bool> {
        Ok(self.stores()?.settings.is_encrypted())
    }

    /// Passphrase the open stores are encrypted with.
    pub fn passphrase(&self) -> Result<Option<&Passphrase>> {
        Ok(self.stores()?.settings.passphrase())
    }

    fn stores(&self) -> Result<&StorePair> {
        self.stores
            .as_ref()
            .ok_or_else(|| Error::NotPermitted("store is closed".to_string()))
    }

    fn take_stores(&mut self) -> Result<StorePair> {
        self.stores
            .take()
            .ok_or_else(|| Error::NotPermitted("store is closed".to_string()))
    }

    /// Open both stores, writing encryption marks only once both
    /// collections have been checked.
    async fn open_pair(&self, passphrase: Option<Passphrase>) -> Result<StorePair> {
        let settings = Store::validate(
            self.backend.clone(),
            &self.config.settings_collection,
            passphrase.clone(),
        )
        .await?;
        let ledger =
            Store::validate(self.backend.clone(), &self.config.ledger_collection, passphrase).await?;
        Ok(StorePair {
            settings: settings.claim().await?,
            ledger: ledger.claim().await?,
        })
    }

    /// Open both stores without a passphrase.
    ///
    /// An encrypted store is reported as [`InitResponse::Encrypted`] rather
    /// than as an error, and leaves the manager closed.
    pub async fn initialize(&mut self) -> Result<InitResponse> {
        self.stores = None;
        match self.open_pair(None).await {
            Ok(stores) => self.stores = Some(stores),
            Err(Error::MaybeEncrypted) => {
                info!("Stores are encrypted, passphrase required");
                return Ok(InitResponse::Encrypted);
            }
            Err(e) => return Err(e),
        }
        info!("Opened plaintext stores");
        self.read_settings().await
    }

    /// Open both stores with `passphrase`.
    ///
    /// # Errors
    /// - `InvalidPassphrase` if the passphrase does not match the stores
    /// - `NotEmpty` or `NotEncrypted` for collections in an unusable state
    pub async fn open_with_passphrase(&mut self, passphrase: Passphrase) -> Result<InitResponse> {
        self.stores = None;
        self.stores = Some(self.open_pair(Some(passphrase)).await?);
        info!("Opened encrypted stores");
        self.read_settings().await
    }

    async fn read_settings(&self) -> Result<InitResponse> {
        match self.get_settings().await {
            Ok(settings) => Ok(InitResponse::Ok(settings)),
            Err(e) if e.is_not_found() => Ok(InitResponse::FirstRun),
            Err(e) => Err(e),
        }
    }

    /// Read the saved settings.
    pub async fn get_settings(&self) -> Result<Settings> {
        let doc = self.stores()?.settings.get(SETTINGS_ID).await?;
        Settings::from_document(doc)
    }

    /// Save settings, rotating both stores to match `passphrase` first.
    ///
    /// `None` leaves or makes the stores plaintext. A passphrase encrypts
    /// plaintext stores or re-keys stores under a different one.
    ///
    /// # Postconditions
    /// - Returns the settings with their new revision
    ///
    /// # Errors
    /// - `Conflict` if `settings.version` is stale and no rotation happened
    /// - `Decryption` if a stored document cannot be read; neither store is
    ///   touched and the manager stays open
    /// - Any failure while rewriting; the manager is then closed and must be
    ///   reopened
    pub async fn save_settings(
        &mut self,
        mut settings: Settings,
        passphrase: Option<Passphrase>,
    ) -> Result<Settings> {
        let current = self.stores()?;
        if needs_rotation(&current.settings, passphrase.as_ref()) {
            // Both collections are read before either is destroyed.
            let settings_docs = current.settings.snapshot().await?;
            let ledger_docs = current.ledger.snapshot().await?;

            let StorePair { settings: s, ledger } = self.take_stores()?;
            info!(encrypted = passphrase.is_some(), "Rotating stores");
            self.stores = Some(StorePair {
                settings: s.rebuild(settings_docs, passphrase.clone()).await?,
                ledger: ledger.rebuild(ledger_docs, passphrase).await?,
            });

            // Rotation rewrote every document under a new revision.
            settings.version = match self.stores()?.settings.get(SETTINGS_ID).await {
                Ok(doc) => doc.revision,
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            };
        }

        let revision = self.stores()?.settings.put(settings.to_document()?).await?;
        debug!(revision = %revision, "Saved settings");
        settings.version = Some(revision);
        Ok(settings)
    }

    /// Read one page of ledger entries, newest id first.
    ///
    /// An absent or malformed `page_token` starts from the newest entry.
    pub async fn list_entries(
        &self,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<Page<LedgerEntry>> {
        if page_size == 0 {
            return Err(Error::InvalidInput("Page size must be positive".to_string()));
        }

        let cursor = page_token.and_then(PageCursor::decode).unwrap_or_default();
        let mut options = ListOptions::all().descending().limit(page_size.saturating_add(1));
        if let Some(next_id) = cursor.next_id {
            options = options.start_key(next_id);
        }

        let mut docs = self.stores()?.ledger.list(options).await?;
        let next_page_token = if docs.len() > page_size {
            docs.split_off(page_size)
                .first()
                .map(|doc| PageCursor::at(doc.id.clone()).encode())
        } else {
            None
        };

        let items = docs
            .into_iter()
            .map(LedgerEntry::from_document)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page {
            items,
            next_page_token,
        })
    }

    /// Read every ledger entry, newest id first.
    pub async fn list_all_entries(&self) -> Result<Vec<LedgerEntry>> {
        self.stores()?
            .ledger
            .list(ListOptions::all().descending())
            .await?
            .into_iter()
            .map(LedgerEntry::from_document)
            .collect()
    }

    pub async fn get_entry(&self, id: &str) -> Result<LedgerEntry> {
        LedgerEntry::from_document(self.stores()?.ledger.get(id).await?)
    }

    /// Save one entry, assigning an id to a new one.
    ///
    /// # Errors
    /// - `Conflict` if `entry.version` is stale
    pub async fn save_entry(&self, mut entry: LedgerEntry) -> Result<LedgerEntry> {
        entry.assign_id();
        let revision = self.stores()?.ledger.put(entry.to_document()?).await?;
        debug!(id = %entry.id, "Saved entry");
        entry.version = Some(revision);
        Ok(entry)
    }

    /// Save many entries in one write, assigning ids to new ones.
    ///
    /// Conflicts are reported per entry instead of failing the batch.
    pub async fn save_entries(&self, entries: Vec<LedgerEntry>) -> Result<Vec<BulkWriteOutcome>> {
        let docs = entries
            .into_iter()
            .map(|mut entry| {
                entry.assign_id();
                entry.to_document()
            })
            .collect::<Result<Vec<_>>>()?;
        info!(count = docs.len(), "Saving entries");
        self.stores()?.ledger.bulk_write(docs).await
    }

    pub async fn delete_entry(&self, id: &str, revision: &Revision) -> Result<Revision> {
        debug!(id = %id, "Deleting entry");
        self.stores()?.ledger.remove(id, revision).await
    }

    /// Replicate the ledger collection with a peer once.
    ///
    /// Documents travel as stored, so an encrypted ledger stays encrypted
    /// on the peer.
    pub async fn replicate(&self, remote: RemoteDescriptor) -> Result<ReplicationReport> {
        let local = self.stores()?.ledger.database().clone();
        let remote = match remote {
            RemoteDescriptor::Direct(db) => db,
            RemoteDescriptor::Alias(name) => self.backend.open(&name).await?,
            RemoteDescriptor::Url { url, credentials } => {
                HttpBackend::open_url(&url, credentials).await?
            }
        };
        expenses_sync::replicate(local, remote).await
    }

    /// Destroy both collections and close the manager.
    pub async fn delete_all(&mut self) -> Result<()> {
        let StorePair { settings, ledger } = self.take_stores()?;
        info!("Deleting all stores");
        settings.destroy().await?;
        ledger.destroy().await
    }

    /// Destroy the ledger and reopen it empty under the same encryption.
    ///
    /// Settings are kept. If reopening fails the manager is closed.
    pub async fn delete_ledger_only(&mut self) -> Result<()> {
        let StorePair { settings, ledger } = self.take_stores()?;
        let passphrase = ledger.passphrase().cloned();
        info!("Deleting ledger");
        ledger.destroy().await?;

        let ledger = Store::open(self.backend.clone(), &self.config.ledger_collection, passphrase).await?;
        self.stores = Some(StorePair { settings, ledger });
        Ok(())
    }
}

fn needs_rotation(store: &Store, passphrase: Option<&Passphrase>) -> bool {
    match (store, passphrase) {
        (Store::Plain(_), None) => false,
        (Store::Plain(_), Some(_)) => true,
        (Store::Encrypted(_), None) => true,
        (Store::Encrypted(store), Some(passphrase)) => !store.is_passphrase(passphrase),
    }
}
