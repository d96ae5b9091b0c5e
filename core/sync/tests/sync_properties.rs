//! Queue and sync-pass properties exercised through the public API.

use async_trait::async_trait;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use loantrack_common::{ApplicationId, EntryId, Error, MediaKind, Result};
use loantrack_storage::MemoryStore;
use loantrack_sync::{
    EntryKind, OfflineQueue, QueuePersistence, QueuedDocument, QueuedForm, RetryPolicy, SyncConfig,
    SyncEngine, SyncOutcome, SyncStore, UploadTransport,
};

/// Transport that fails the listed ids and records every call.
struct ScriptedTransport {
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(failing: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: failing.iter().map(|s| s.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn respond(&self, id: &EntryId) -> Result<()> {
        self.calls.lock().unwrap().push(id.to_string());
        if self.failing.contains(id.as_str()) {
            Err(Error::Network(format!("connection reset uploading {}", id)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl UploadTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn upload_document(&self, document: &QueuedDocument) -> Result<()> {
        self.respond(&document.id)
    }

    async fn upload_form(&self, form: &QueuedForm) -> Result<()> {
        self.respond(&form.id)
    }
}

/// Transport that holds document `d1` until released.
struct GatedTransport {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl UploadTransport for GatedTransport {
    fn name(&self) -> &str {
        "gated"
    }

    async fn upload_document(&self, document: &QueuedDocument) -> Result<()> {
        if document.id.as_str() == "d1" {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(())
    }

    async fn upload_form(&self, _form: &QueuedForm) -> Result<()> {
        Ok(())
    }
}

fn id(s: &str) -> EntryId {
    EntryId::new(s).unwrap()
}

fn document(entry: &str) -> QueuedDocument {
    QueuedDocument::new(
        MediaKind::Image,
        format!("file:///captures/{}.jpg", entry),
        format!("{}.jpg", entry),
        2048,
        ApplicationId::new("app-1").unwrap(),
    )
    .with_id(id(entry))
}

fn new_store() -> SyncStore {
    SyncStore::new(QueuePersistence::new(Arc::new(MemoryStore::new())))
}

fn engine(store: &SyncStore, transport: Arc<dyn UploadTransport>) -> SyncEngine {
    let config = SyncConfig {
        retry: RetryPolicy::immediate(),
        ..SyncConfig::default()
    };
    SyncEngine::new(store.clone(), transport, &config)
}

fn completed(outcome: SyncOutcome) -> loantrack_sync::SyncReport {
    match outcome {
        SyncOutcome::Completed(report) => report,
        SyncOutcome::Skipped => panic!("pass was skipped"),
    }
}

#[derive(Debug, Clone)]
enum Op {
    EnqueueDocument(u8),
    EnqueueForm(u8),
    MarkUploaded(bool, u8),
    MarkFailed(bool, u8),
    Remove(bool, u8),
    Prune,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..8).prop_map(Op::EnqueueDocument),
        (0u8..8).prop_map(Op::EnqueueForm),
        (any::<bool>(), 0u8..8).prop_map(|(d, n)| Op::MarkUploaded(d, n)),
        (any::<bool>(), 0u8..8).prop_map(|(d, n)| Op::MarkFailed(d, n)),
        (any::<bool>(), 0u8..8).prop_map(|(d, n)| Op::Remove(d, n)),
        Just(Op::Prune),
    ]
}

fn kind(is_document: bool) -> EntryKind {
    if is_document {
        EntryKind::Document
    } else {
        EntryKind::Form
    }
}

proptest! {
    #[test]
    fn prop_pending_matches_unuploaded_entries(ops in prop::collection::vec(op(), 0..64)) {
        let mut queue = OfflineQueue::new();
        for op in ops {
            match op {
                Op::EnqueueDocument(n) => {
                    let _ = queue.enqueue_document(document(&format!("e{}", n)));
                }
                Op::EnqueueForm(n) => {
                    let form = QueuedForm::new(serde_json::json!({ "n": n }), None)
                        .with_id(id(&format!("e{}", n)));
                    let _ = queue.enqueue_form(form);
                }
                Op::MarkUploaded(d, n) => {
                    queue.mark_uploaded(kind(d), &id(&format!("e{}", n)));
                }
                Op::MarkFailed(d, n) => {
                    let before = queue.pending_count();
                    let entry = id(&format!("e{}", n));
                    let was_uploaded = queue.status(kind(d), &entry).map(|s| s.is_uploaded());
                    queue.mark_failed(kind(d), &entry, "boom");
                    prop_assert_eq!(queue.pending_count(), before);
                    prop_assert_eq!(
                        queue.status(kind(d), &entry).map(|s| s.is_uploaded()),
                        was_uploaded
                    );
                }
                Op::Remove(d, n) => {
                    queue.remove(kind(d), &id(&format!("e{}", n)));
                }
                Op::Prune => {
                    let before = queue.pending_count();
                    queue.prune_uploaded();
                    prop_assert_eq!(queue.pending_count(), before);
                    prop_assert!(queue.documents().iter().all(|d| !d.status().is_uploaded()));
                    prop_assert!(queue.forms().iter().all(|f| !f.status().is_uploaded()));
                }
            }
            prop_assert_eq!(queue.pending_count(), queue.recount());
        }
    }
}

#[test]
fn test_mark_uploaded_is_idempotent() {
    let mut queue = OfflineQueue::new();
    queue.enqueue_document(document("d1")).unwrap();
    queue.enqueue_document(document("d2")).unwrap();

    assert!(queue.mark_uploaded(EntryKind::Document, &id("d1")));
    assert!(!queue.mark_uploaded(EntryKind::Document, &id("d1")));
    assert_eq!(queue.pending_count(), 1);
    assert!(!queue.mark_uploaded(EntryKind::Document, &id("missing")));
    assert_eq!(queue.pending_count(), 1);
}

#[test]
fn test_prune_removes_exactly_uploaded() {
    let mut queue = OfflineQueue::new();
    for entry in ["d1", "d2", "d3"] {
        queue.enqueue_document(document(entry)).unwrap();
    }
    queue
        .enqueue_form(QueuedForm::new(serde_json::json!({}), None).with_id(id("f1")))
        .unwrap();
    queue.mark_uploaded(EntryKind::Document, &id("d2"));
    queue.mark_uploaded(EntryKind::Form, &id("f1"));

    assert_eq!(queue.prune_uploaded(), 2);
    assert_eq!(queue.pending_count(), 2);
    let remaining: Vec<&str> = queue.documents().iter().map(|d| d.id.as_str()).collect();
    assert_eq!(remaining, vec!["d1", "d3"]);
    assert!(queue.forms().is_empty());
}

#[tokio::test]
async fn test_single_document_uploads() {
    let store = new_store();
    store.enqueue_document(document("d1")).await.unwrap();

    let report = completed(engine(&store, ScriptedTransport::new(&[])).sync_now().await.unwrap());

    assert_eq!(report.documents_uploaded, 1);
    let state = store.read().await;
    assert_eq!(state.pending_uploads(), 0);
    assert!(state.queue().document(&id("d1")).unwrap().status().is_uploaded());
}

#[tokio::test]
async fn test_first_fails_second_succeeds() {
    let store = new_store();
    store.enqueue_document(document("d1")).await.unwrap();
    store.enqueue_document(document("d2")).await.unwrap();

    let report = completed(
        engine(&store, ScriptedTransport::new(&["d1"]))
            .sync_now()
            .await
            .unwrap(),
    );

    assert_eq!(report.documents_uploaded, 1);
    assert_eq!(report.documents_failed, 1);
    let state = store.read().await;
    assert_eq!(state.pending_uploads(), 1);
    let d1 = state.queue().document(&id("d1")).unwrap().status();
    assert!(!d1.is_uploaded());
    assert!(d1.last_error().unwrap().contains("connection reset"));
    assert!(state.queue().document(&id("d2")).unwrap().status().is_uploaded());
}

#[tokio::test]
async fn test_middle_failure_does_not_abort_pass() {
    let store = new_store();
    for entry in ["d1", "d2", "d3"] {
        store.enqueue_document(document(entry)).await.unwrap();
    }
    let transport = ScriptedTransport::new(&["d2"]);

    completed(engine(&store, transport.clone()).sync_now().await.unwrap());

    assert_eq!(transport.calls(), vec!["d1", "d2", "d3"]);
    let state = store.read().await;
    let queue = state.queue();
    assert!(queue.document(&id("d1")).unwrap().status().is_uploaded());
    assert!(queue.document(&id("d2")).unwrap().status().last_error().is_some());
    assert!(queue.document(&id("d3")).unwrap().status().is_uploaded());
    assert_eq!(state.pending_uploads(), 1);
    assert!(state.last_sync_at.is_some());
}

#[tokio::test]
async fn test_trigger_while_running_is_skipped() {
    let store = new_store();
    store.enqueue_document(document("d1")).await.unwrap();
    store.enqueue_document(document("d2")).await.unwrap();
    let transport = Arc::new(GatedTransport {
        entered: Notify::new(),
        release: Notify::new(),
    });
    let engine = Arc::new(engine(&store, transport.clone()));

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.sync_now().await }
    });
    transport.entered.notified().await;

    let before = store.summary().await;
    let second = engine.sync_now().await.unwrap();
    assert!(second.is_skipped());
    assert_eq!(store.summary().await, before);

    transport.release.notify_one();
    let report = completed(first.await.unwrap().unwrap());
    assert_eq!(report.documents_uploaded, 2);
}

#[tokio::test]
async fn test_pass_uploads_entries_queued_by_another_store() {
    let backend = Arc::new(MemoryStore::new());
    let watcher = SyncStore::restore(QueuePersistence::new(backend.clone()))
        .await
        .unwrap();
    let capture = SyncStore::restore(QueuePersistence::new(backend.clone()))
        .await
        .unwrap();
    capture.enqueue_document(document("d1")).await.unwrap();
    assert_eq!(watcher.summary().await.pending_uploads, 0);

    let transport = ScriptedTransport::new(&[]);
    let report = completed(engine(&watcher, transport.clone()).sync_now().await.unwrap());

    assert_eq!(transport.calls(), vec!["d1"]);
    assert_eq!(report.documents_uploaded, 1);
    assert_eq!(report.pending_after, 0);

    let reloaded = SyncStore::restore(QueuePersistence::new(backend)).await.unwrap();
    let state = reloaded.read().await;
    assert!(state.queue().document(&id("d1")).unwrap().status().is_uploaded());
    assert_eq!(state.pending_uploads(), 0);
}

#[tokio::test]
async fn test_pass_keeps_unsaved_local_entries() {
    let backend = Arc::new(MemoryStore::new());
    let watcher = SyncStore::restore(QueuePersistence::new(backend.clone()))
        .await
        .unwrap();
    let capture = SyncStore::restore(QueuePersistence::new(backend.clone()))
        .await
        .unwrap();

    backend.set_fail_writes(true);
    watcher.enqueue_document(document("d2")).await.unwrap();
    backend.set_fail_writes(false);
    capture.enqueue_document(document("d1")).await.unwrap();

    let transport = ScriptedTransport::new(&[]);
    let report = completed(engine(&watcher, transport.clone()).sync_now().await.unwrap());

    let mut calls = transport.calls();
    calls.sort();
    assert_eq!(calls, vec!["d1", "d2"]);
    assert_eq!(report.documents_uploaded, 2);

    let reloaded = SyncStore::restore(QueuePersistence::new(backend)).await.unwrap();
    let state = reloaded.read().await;
    assert!(state.queue().document(&id("d1")).unwrap().status().is_uploaded());
    assert!(state.queue().document(&id("d2")).unwrap().status().is_uploaded());
}
