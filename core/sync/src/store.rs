//! Shared handle over the in-memory sync state and its durable copy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use loantrack_common::{EntryId, Result};

use crate::persistence::{QueuePersistence, QueueSnapshot};
use crate::queue::{EntryKind, QueuedDocument, QueuedForm};
use crate::state::{SyncState, SyncSummary};

/// Cloneable handle to the process-wide sync state.
///
/// User-facing mutations write the queue through to durable storage; a
/// failed write is logged and the change is picked up by the next
/// successful write. Other processes may write the same record, so a sync
/// pass calls [`SyncStore::refresh`] before reading the queue.
#[derive(Clone)]
pub struct SyncStore {
    state: Arc<RwLock<SyncState>>,
    persistence: QueuePersistence,
    /// Held from snapshot capture until the write completes, so snapshots
    /// reach storage in the order they were taken.
    save_lock: Arc<Mutex<()>>,
    /// Set on every queue change, cleared once a snapshot holding it is saved.
    unsaved: Arc<AtomicBool>,
}

impl SyncStore {
    /// Create a store with empty state.
    pub fn new(persistence: QueuePersistence) -> Self {
        Self::with_state(SyncState::new(), persistence)
    }

    /// Create a store from whatever was persisted, or empty state.
    ///
    /// # Errors
    /// - Storage unreadable
    /// - Stored blob malformed
    pub async fn restore(persistence: QueuePersistence) -> Result<Self> {
        let state = match persistence.load().await? {
            Some(snapshot) => {
                let state = snapshot.into_state();
                info!(
                    "Restored offline queue from {}: {} pending uploads",
                    persistence.store_name(),
                    state.pending_uploads()
                );
                state
            }
            None => SyncState::new(),
        };

        Ok(Self::with_state(state, persistence))
    }

    fn with_state(state: SyncState, persistence: QueuePersistence) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            persistence,
            save_lock: Arc::new(Mutex::new(())),
            unsaved: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Read access to the state.
    pub async fn read(&self) -> RwLockReadGuard<'_, SyncState> {
        self.state.read().await
    }

    /// Write access to the state. Changes are not persisted until
    /// [`SyncStore::persist`] is called.
    pub async fn write(&self) -> RwLockWriteGuard<'_, SyncState> {
        let guard = self.state.write().await;
        self.unsaved.store(true, Ordering::Release);
        guard
    }

    /// User-visible signals.
    pub async fn summary(&self) -> SyncSummary {
        self.state.read().await.summary()
    }

    /// Write the current queue to durable storage.
    pub async fn persist(&self) -> Result<()> {
        let _saving = self.save_lock.lock().await;
        let snapshot = {
            let state = self.state.read().await;
            self.unsaved.store(false, Ordering::Release);
            QueueSnapshot::capture(&state)
        };
        self.save(&snapshot).await
    }

    async fn save(&self, snapshot: &QueueSnapshot) -> Result<()> {
        let result = self.persistence.save(snapshot).await;
        if result.is_err() {
            self.unsaved.store(true, Ordering::Release);
        }
        result
    }

    async fn persist_quietly(&self) {
        if let Err(e) = self.persist().await {
            warn!("Failed to persist offline queue: {}", e);
        }
    }

    /// Bring the in-memory queue up to date with durable storage.
    ///
    /// With nothing unsaved locally, the stored queue replaces the
    /// in-memory one; it may hold entries queued or removed by another
    /// process. With unsaved local changes the stored entries are merged
    /// in (see [`crate::OfflineQueue::merge`]) and the result is written
    /// back. The connectivity flag is kept either way.
    ///
    /// # Errors
    /// - Storage unreadable or stored blob malformed
    /// - Merged queue could not be written back
    pub async fn refresh(&self) -> Result<()> {
        let _saving = self.save_lock.lock().await;
        let mut state = self.state.write().await;
        let stored = self.persistence.load().await?;

        if !self.unsaved.load(Ordering::Acquire) {
            let is_online = state.is_online;
            *state = match stored {
                Some(snapshot) => snapshot.into_state(),
                None => SyncState::new(),
            };
            state.set_online_status(is_online);
            debug!("Reloaded offline queue: {} pending", state.pending_uploads());
            return Ok(());
        }

        if let Some(snapshot) = stored {
            let added = state.queue_mut().merge(snapshot.documents, snapshot.forms);
            if snapshot.last_sync_at > state.last_sync_at {
                state.last_sync_at = snapshot.last_sync_at;
            }
            debug!("Merged {} stored entries into unsaved offline queue", added);
        }
        self.unsaved.store(false, Ordering::Release);
        let merged = QueueSnapshot::capture(&state);
        drop(state);
        self.save(&merged).await
    }

    /// Queue a document for upload.
    ///
    /// # Errors
    /// - A document with the same id is already queued
    pub async fn enqueue_document(&self, document: QueuedDocument) -> Result<EntryId> {
        let id = document.id.clone();
        self.write().await.queue_mut().enqueue_document(document)?;
        info!("Queued document {}", id);
        self.persist_quietly().await;
        Ok(id)
    }

    /// Queue a form for upload.
    ///
    /// # Errors
    /// - A form with the same id is already queued
    pub async fn enqueue_form(&self, form: QueuedForm) -> Result<EntryId> {
        let id = form.id.clone();
        self.write().await.queue_mut().enqueue_form(form)?;
        info!("Queued form {}", id);
        self.persist_quietly().await;
        Ok(id)
    }

    /// Mark an entry uploaded. Returns whether anything changed.
    pub async fn mark_uploaded(&self, kind: EntryKind, id: &EntryId) -> bool {
        let changed = self.write().await.queue_mut().mark_uploaded(kind, id);
        if changed {
            self.persist_quietly().await;
        }
        changed
    }

    /// Record a failed attempt. Returns whether anything changed.
    pub async fn mark_failed(&self, kind: EntryKind, id: &EntryId, message: impl Into<String>) -> bool {
        let changed = self.write().await.queue_mut().mark_failed(kind, id, message);
        if changed {
            self.persist_quietly().await;
        }
        changed
    }

    /// Delete an entry regardless of status.
    pub async fn remove(&self, kind: EntryKind, id: &EntryId) -> bool {
        let removed = self.write().await.queue_mut().remove(kind, id);
        if removed {
            info!("Removed {} {}", kind, id);
            self.persist_quietly().await;
        }
        removed
    }

    /// Make a failed or dead-lettered entry eligible again.
    pub async fn requeue(&self, kind: EntryKind, id: &EntryId) -> bool {
        let changed = self.write().await.queue_mut().requeue(kind, id);
        if changed {
            self.persist_quietly().await;
        }
        changed
    }

    /// Remove every uploaded entry. Returns how many were removed.
    pub async fn prune_uploaded(&self) -> usize {
        let pruned = self.write().await.queue_mut().prune_uploaded();
        if pruned > 0 {
            info!("Pruned {} uploaded entries", pruned);
            self.persist_quietly().await;
        }
        pruned
    }

    /// Record the connectivity flag. Returns the previous value.
    pub async fn set_online_status(&self, online: bool) -> bool {
        let mut state = self.state.write().await;
        let previous = state.is_online;
        state.set_online_status(online);
        previous
    }

    /// Drop all queued entries and the persisted copy (logout).
    pub async fn reset(&self) -> Result<()> {
        let _saving = self.save_lock.lock().await;
        self.write().await.reset();
        info!("Offline queue reset");
        self.persistence.clear().await?;
        self.unsaved.store(false, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loantrack_common::{ApplicationId, MediaKind};
    use loantrack_storage::{MemoryStore, RecordStore};

    fn document(id: &str) -> QueuedDocument {
        QueuedDocument::new(
            MediaKind::Image,
            format!("file:///photos/{}.jpg", id),
            format!("{}.jpg", id),
            512,
            ApplicationId::new("app-1").unwrap(),
        )
        .with_id(EntryId::new(id).unwrap())
    }

    #[tokio::test]
    async fn test_enqueue_is_written_through() {
        let backend = Arc::new(MemoryStore::new());
        let store = SyncStore::new(QueuePersistence::new(backend.clone()));

        store.enqueue_document(document("d1")).await.unwrap();

        let restored = SyncStore::restore(QueuePersistence::new(backend)).await.unwrap();
        assert_eq!(restored.summary().await.pending_uploads, 1);
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_memory() {
        let backend = Arc::new(MemoryStore::new());
        let store = SyncStore::new(QueuePersistence::new(backend.clone()));

        backend.set_fail_writes(true);
        store.enqueue_document(document("d1")).await.unwrap();
        assert_eq!(store.summary().await.pending_uploads, 1);
        assert!(store.persist().await.is_err());

        backend.set_fail_writes(false);
        store.persist().await.unwrap();
        assert!(backend.get("offlineData").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reset_clears_persisted_copy() {
        let backend = Arc::new(MemoryStore::new());
        let store = SyncStore::new(QueuePersistence::new(backend.clone()));
        store.enqueue_document(document("d1")).await.unwrap();

        store.reset().await.unwrap();
        assert_eq!(store.summary().await.pending_uploads, 0);
        assert!(backend.get("offlineData").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_without_snapshot_is_empty() {
        let store = SyncStore::restore(QueuePersistence::new(Arc::new(MemoryStore::new())))
            .await
            .unwrap();
        let summary = store.summary().await;
        assert_eq!(summary.pending_uploads, 0);
        assert!(summary.last_sync_at.is_none());
    }

    #[tokio::test]
    async fn test_online_status_returns_previous() {
        let store = SyncStore::new(QueuePersistence::new(Arc::new(MemoryStore::new())));
        assert!(store.set_online_status(false).await);
        assert!(!store.set_online_status(true).await);
    }

    #[tokio::test]
    async fn test_refresh_picks_up_other_writers() {
        let backend = Arc::new(MemoryStore::new());
        let watcher = SyncStore::restore(QueuePersistence::new(backend.clone()))
            .await
            .unwrap();
        let capture = SyncStore::restore(QueuePersistence::new(backend.clone()))
            .await
            .unwrap();

        capture.enqueue_document(document("d1")).await.unwrap();
        capture.enqueue_document(document("d2")).await.unwrap();
        watcher.refresh().await.unwrap();
        assert_eq!(watcher.summary().await.pending_uploads, 2);

        capture
            .remove(EntryKind::Document, &EntryId::new("d1").unwrap())
            .await;
        watcher.refresh().await.unwrap();
        let state = watcher.read().await;
        assert_eq!(state.pending_uploads(), 1);
        assert!(state.queue().document(&EntryId::new("d1").unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_refresh_merges_unsaved_changes() {
        let backend = Arc::new(MemoryStore::new());
        let watcher = SyncStore::new(QueuePersistence::new(backend.clone()));
        let capture = SyncStore::new(QueuePersistence::new(backend.clone()));
        capture.enqueue_document(document("d1")).await.unwrap();

        backend.set_fail_writes(true);
        watcher.enqueue_document(document("d2")).await.unwrap();
        backend.set_fail_writes(false);

        watcher.refresh().await.unwrap();
        assert_eq!(watcher.summary().await.pending_uploads, 2);

        let restored = SyncStore::restore(QueuePersistence::new(backend)).await.unwrap();
        let state = restored.read().await;
        let ids: Vec<&str> = state.queue().documents().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d2", "d1"]);
    }

    #[tokio::test]
    async fn test_refresh_keeps_online_flag() {
        let store = SyncStore::new(QueuePersistence::new(Arc::new(MemoryStore::new())));
        store.set_online_status(false).await;
        store.refresh().await.unwrap();
        assert!(!store.summary().await.is_online);
    }

    /// Delays its first write until told to continue.
    struct SlowFirstWrite {
        inner: MemoryStore,
        first: AtomicBool,
        entered: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl RecordStore for SlowFirstWrite {
        fn name(&self) -> &str {
            "slow"
        }

        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
            if self.first.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key).await
        }

        async fn keys(&self) -> Result<Vec<String>> {
            self.inner.keys().await
        }
    }

    #[tokio::test]
    async fn test_concurrent_saves_land_in_order() {
        let backend = Arc::new(SlowFirstWrite {
            inner: MemoryStore::new(),
            first: AtomicBool::new(true),
            entered: tokio::sync::Notify::new(),
        });
        let store = SyncStore::new(QueuePersistence::new(backend.clone()));

        let first = {
            let store = store.clone();
            tokio::spawn(async move { store.enqueue_document(document("d1")).await })
        };
        backend.entered.notified().await;
        store.enqueue_document(document("d2")).await.unwrap();
        first.await.unwrap().unwrap();

        assert_eq!(store.summary().await.pending_uploads, 2);
        let restored = SyncStore::restore(QueuePersistence::new(backend)).await.unwrap();
        assert_eq!(restored.summary().await.pending_uploads, 2);
    }
}
