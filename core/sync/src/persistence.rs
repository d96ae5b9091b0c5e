//! Serialized form of the offline queue and its durable storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use loantrack_common::{Error, Result};
use loantrack_storage::{validate_key, RecordStore};

use crate::queue::{OfflineQueue, QueuedDocument, QueuedForm};
use crate::state::SyncState;

/// Store key the queue is persisted under.
pub const DEFAULT_QUEUE_KEY: &str = "offlineData";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// The blob written to durable storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub documents: Vec<QueuedDocument>,
    #[serde(default)]
    pub forms: Vec<QueuedForm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl QueueSnapshot {
    /// Capture the persistent parts of a sync state.
    pub fn capture(state: &SyncState) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            documents: state.queue().documents().to_vec(),
            forms: state.queue().forms().to_vec(),
            last_sync_at: state.last_sync_at,
        }
    }

    /// Rebuild a sync state from this snapshot.
    pub fn into_state(self) -> SyncState {
        let queue = OfflineQueue::from_entries(self.documents, self.forms);
        SyncState::with_queue(queue, self.last_sync_at)
    }

    /// Serialize to bytes for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes.
    ///
    /// # Errors
    /// - Malformed JSON
    /// - Snapshot written by a newer format version
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(Error::Serialization(format!(
                "Unsupported queue snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }
}

/// Reads and writes the queue snapshot under a fixed key.
#[derive(Clone)]
pub struct QueuePersistence {
    store: Arc<dyn RecordStore>,
    key: String,
}

impl QueuePersistence {
    /// Persist under the default key.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            key: DEFAULT_QUEUE_KEY.to_string(),
        }
    }

    /// Persist under a custom key.
    pub fn with_key(store: Arc<dyn RecordStore>, key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        validate_key(&key)?;
        Ok(Self { store, key })
    }

    /// Key the snapshot is stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Name of the underlying store.
    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Load the stored snapshot, if any.
    pub async fn load(&self) -> Result<Option<QueueSnapshot>> {
        match self.store.get(&self.key).await? {
            Some(bytes) => QueueSnapshot::from_bytes(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Replace the stored snapshot.
    pub async fn save(&self, snapshot: &QueueSnapshot) -> Result<()> {
        let bytes = snapshot.to_bytes()?;
        debug!(
            "Persisting queue ({} documents, {} forms, {} bytes) to {}",
            snapshot.documents.len(),
            snapshot.forms.len(),
            bytes.len(),
            self.store.name()
        );
        self.store.set(&self.key, bytes).await
    }

    /// Remove the stored snapshot.
    pub async fn clear(&self) -> Result<()> {
        self.store.remove(&self.key).await
    }
}
