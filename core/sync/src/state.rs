//! Process-wide sync state: the offline queue plus connectivity and
//! last-sync bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::OfflineQueue;

/// Overall sync state observed by the application.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    queue: OfflineQueue,
    /// Result of the most recent reachability check.
    pub is_online: bool,
    /// When the last sync pass completed (not necessarily successfully).
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl SyncState {
    /// Create a new empty sync state.
    pub fn new() -> Self {
        Self {
            queue: OfflineQueue::new(),
            is_online: true,
            last_sync_at: None,
        }
    }

    /// Create state around a restored queue.
    pub fn with_queue(queue: OfflineQueue, last_sync_at: Option<DateTime<Utc>>) -> Self {
        Self {
            queue,
            is_online: true,
            last_sync_at,
        }
    }

    /// The offline queue.
    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    /// Mutable access to the offline queue.
    pub fn queue_mut(&mut self) -> &mut OfflineQueue {
        &mut self.queue
    }

    /// Number of documents and forms not yet uploaded.
    pub fn pending_uploads(&self) -> usize {
        self.queue.pending_count()
    }

    /// Record the connectivity flag.
    pub fn set_online_status(&mut self, online: bool) {
        self.is_online = online;
    }

    /// Record when a sync pass completed.
    pub fn set_last_sync_time(&mut self, at: DateTime<Utc>) {
        self.last_sync_at = Some(at);
    }

    /// Clear everything queued (on logout). Connectivity is kept.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.last_sync_at = None;
    }

    /// Cheap copy of the user-visible signals.
    pub fn summary(&self) -> SyncSummary {
        SyncSummary {
            pending_uploads: self.queue.pending_count(),
            documents: self.queue.documents().len(),
            forms: self.queue.forms().len(),
            dead_lettered: self.queue.dead_lettered_count(),
            is_online: self.is_online,
            last_sync_at: self.last_sync_at,
        }
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

/// User-visible snapshot of the sync state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub pending_uploads: usize,
    pub documents: usize,
    pub forms: usize,
    pub dead_lettered: usize,
    pub is_online: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{EntryKind, QueuedDocument, QueuedForm};
    use loantrack_common::{ApplicationId, MediaKind};

    fn populated() -> SyncState {
        let mut state = SyncState::new();
        let app = ApplicationId::new("app-1").unwrap();
        state
            .queue_mut()
            .enqueue_document(QueuedDocument::new(MediaKind::Video, "file:///v.mp4", "v.mp4", 9, app))
            .unwrap();
        state
            .queue_mut()
            .enqueue_form(QueuedForm::new(serde_json::json!({}), None))
            .unwrap();
        state
    }

    #[test]
    fn test_new_state_is_empty_and_online() {
        let state = SyncState::new();
        assert_eq!(state.pending_uploads(), 0);
        assert!(state.is_online);
        assert!(state.last_sync_at.is_none());
    }

    #[test]
    fn test_summary_tracks_queue() {
        let mut state = populated();
        let form_id = state.queue().forms()[0].id.clone();
        state.queue_mut().mark_uploaded(EntryKind::Form, &form_id);
        state.set_online_status(false);

        let summary = state.summary();
        assert_eq!(summary.pending_uploads, 1);
        assert_eq!(summary.documents, 1);
        assert_eq!(summary.forms, 1);
        assert!(!summary.is_online);
    }

    #[test]
    fn test_reset_clears_queue_and_timestamp() {
        let mut state = populated();
        state.set_last_sync_time(Utc::now());
        state.set_online_status(false);

        state.reset();
        assert_eq!(state.pending_uploads(), 0);
        assert!(state.queue().documents().is_empty());
        assert!(state.last_sync_at.is_none());
        assert!(!state.is_online);
    }
}
