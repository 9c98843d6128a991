//! One-shot replication between a local collection and a peer.

use futures::try_join;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use expenses_common::{Document, Result};
use expenses_storage::DocumentDatabase;

use crate::conflict::{winning_changes, RevisionIndex};

/// Configuration for a replication pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Documents per replicated write.
    pub batch_size: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

/// Documents transferred by one replication pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationReport {
    /// Documents written to the remote.
    pub pushed: usize,
    /// Documents written to the local collection.
    pub pulled: usize,
}

/// Bidirectional replicator between two collections.
pub struct Replicator {
    local: Arc<dyn DocumentDatabase>,
    remote: Arc<dyn DocumentDatabase>,
    config: ReplicationConfig,
}

impl Replicator {
    /// Create a replicator with the default configuration.
    pub fn new(local: Arc<dyn DocumentDatabase>, remote: Arc<dyn DocumentDatabase>) -> Self {
        Self::with_config(local, remote, ReplicationConfig::default())
    }

    pub fn with_config(
        local: Arc<dyn DocumentDatabase>,
        remote: Arc<dyn DocumentDatabase>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            local,
            remote,
            config,
        }
    }

    /// Run one push and one pull.
    ///
    /// Both change feeds are read first, then push and pull run
    /// concurrently against that snapshot. The pass fails as a whole if
    /// either direction fails; documents already written stay written.
    pub async fn run(&self) -> Result<ReplicationReport> {
        info!(
            local = %self.local.name(),
            remote = %self.remote.name(),
            "Starting replication"
        );

        let (local_changes, remote_changes) =
            try_join!(self.local.changes(), self.remote.changes())?;
        let local_index = RevisionIndex::from_changes(&local_changes);
        let remote_index = RevisionIndex::from_changes(&remote_changes);

        let outgoing = winning_changes(local_changes, &remote_index);
        let incoming = winning_changes(remote_changes, &local_index);
        debug!(
            outgoing = outgoing.len(),
            incoming = incoming.len(),
            "Computed replication sets"
        );

        let (pushed, pulled) = try_join!(
            self.transfer(self.remote.as_ref(), outgoing),
            self.transfer(self.local.as_ref(), incoming),
        )?;

        let report = ReplicationReport { pushed, pulled };
        info!(pushed, pulled, "Replication complete");
        Ok(report)
    }

    async fn transfer(&self, target: &dyn DocumentDatabase, docs: Vec<Document>) -> Result<usize> {
        let batch_size = self.config.batch_size.max(1);
        let mut written = 0;
        let mut docs = docs.into_iter().peekable();
        while docs.peek().is_some() {
            let batch: Vec<Document> = docs.by_ref().take(batch_size).collect();
            written += target.write_replicated(batch).await?;
        }
        Ok(written)
    }
}

/// Replicate `local` with `remote` once using the default configuration.
pub async fn replicate(
    local: Arc<dyn DocumentDatabase>,
    remote: Arc<dyn DocumentDatabase>,
) -> Result<ReplicationReport> {
    Replicator::new(local, remote).run().await
}
