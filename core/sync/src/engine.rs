//! Sync engine that drains the offline queue through an upload transport.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use loantrack_common::{EntryId, Error, Result};

use crate::config::SyncConfig;
use crate::queue::EntryKind;
use crate::retry::RetryPolicy;
use crate::store::SyncStore;
use crate::transport::UploadTransport;

/// Counts produced by one sync pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub documents_uploaded: usize,
    pub documents_failed: usize,
    pub forms_uploaded: usize,
    pub forms_failed: usize,
    /// Pending entries skipped because of backoff or dead-lettering.
    pub deferred: usize,
    /// Entries removed from the queue while their upload was in flight.
    /// They are counted in neither the uploaded nor the failed totals.
    pub removed_mid_pass: usize,
    /// Entries still pending when the pass finished.
    pub pending_after: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
}

impl SyncReport {
    /// Entries uploaded during the pass.
    pub fn uploaded(&self) -> usize {
        self.documents_uploaded + self.forms_uploaded
    }

    /// Entries whose upload failed during the pass.
    pub fn failed(&self) -> usize {
        self.documents_failed + self.forms_failed
    }
}

/// Result of requesting a sync pass.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Another pass was already running; nothing was attempted.
    Skipped,
    /// The pass ran to completion.
    Completed(SyncReport),
}

impl SyncOutcome {
    /// The report, if the pass ran.
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Skipped => None,
            SyncOutcome::Completed(report) => Some(report),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, SyncOutcome::Skipped)
    }
}

/// What recording an attempt did to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recorded {
    Uploaded,
    Failed,
    /// The entry left the queue during the upload.
    Gone,
}

/// Clears the running flag when a pass exits, however it exits.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains pending uploads. At most one pass runs at a time.
pub struct SyncEngine {
    store: SyncStore,
    transport: Arc<dyn UploadTransport>,
    retry_policy: RetryPolicy,
    upload_timeout: Duration,
    running: AtomicBool,
}

impl SyncEngine {
    /// Create an engine over a store and transport.
    pub fn new(store: SyncStore, transport: Arc<dyn UploadTransport>, config: &SyncConfig) -> Self {
        Self {
            store,
            transport,
            retry_policy: config.retry.clone(),
            upload_timeout: config.upload_timeout,
            running: AtomicBool::new(false),
        }
    }

    /// The store this engine drains.
    pub fn store(&self) -> &SyncStore {
        &self.store
    }

    /// Whether a pass is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one sync pass unless one is already running.
    ///
    /// The queue is first refreshed from durable storage, so entries
    /// written by other processes are included. Eligible entries are then
    /// copied and attempted in order; entries queued after that wait for
    /// the next pass.
    ///
    /// # Errors
    /// - The queue could not be loaded from storage (or a merged queue
    ///   written back). No upload is attempted in that case.
    ///
    /// Individual upload failures never fail the pass; they are recorded
    /// on the entries.
    pub async fn sync_now(&self) -> Result<SyncOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync already in progress, skipping");
            return Ok(SyncOutcome::Skipped);
        }
        let _guard = RunningGuard(&self.running);

        let started_at = Utc::now();
        let start = Instant::now();
        info!("Starting sync pass via {}", self.transport.name());

        if let Err(e) = self.store.refresh().await {
            error!("Offline sync failed: could not load queue: {}", e);
            return Err(e);
        }

        let (documents, forms, deferred) = {
            let state = self.store.read().await;
            let queue = state.queue();
            let documents = queue.eligible_documents(started_at);
            let forms = queue.eligible_forms(started_at);
            let deferred = queue.pending_count() - documents.len() - forms.len();
            (documents, forms, deferred)
        };

        let mut documents_uploaded = 0;
        let mut documents_failed = 0;
        let mut removed_mid_pass = 0;
        for document in &documents {
            let result = self.attempt(self.transport.upload_document(document)).await;
            match self.record(EntryKind::Document, &document.id, result).await {
                Recorded::Uploaded => documents_uploaded += 1,
                Recorded::Failed => documents_failed += 1,
                Recorded::Gone => removed_mid_pass += 1,
            }
        }

        let mut forms_uploaded = 0;
        let mut forms_failed = 0;
        for form in &forms {
            let result = self.attempt(self.transport.upload_form(form)).await;
            match self.record(EntryKind::Form, &form.id, result).await {
                Recorded::Uploaded => forms_uploaded += 1,
                Recorded::Failed => forms_failed += 1,
                Recorded::Gone => removed_mid_pass += 1,
            }
        }

        let finished_at = Utc::now();
        let pending_after = {
            let mut state = self.store.write().await;
            state.set_last_sync_time(finished_at);
            state.pending_uploads()
        };

        if let Err(e) = self.store.persist().await {
            warn!("Failed to persist queue after sync: {}", e);
        }

        let report = SyncReport {
            documents_uploaded,
            documents_failed,
            forms_uploaded,
            forms_failed,
            deferred,
            removed_mid_pass,
            pending_after,
            started_at,
            finished_at,
            duration: start.elapsed(),
        };

        info!(
            "Sync pass completed in {:?}: {} uploaded, {} failed, {} deferred, {} pending",
            report.duration,
            report.uploaded(),
            report.failed(),
            report.deferred,
            report.pending_after
        );

        Ok(SyncOutcome::Completed(report))
    }

    /// Run one upload under the timeout, turning panics into errors.
    async fn attempt<F>(&self, upload: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        match tokio::time::timeout(self.upload_timeout, AssertUnwindSafe(upload).catch_unwind()).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(Error::Internal(format!(
                "Upload panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(Error::Timeout(format!(
                "Upload timed out after {:?}",
                self.upload_timeout
            ))),
        }
    }

    /// Apply an attempt's result to the entry.
    ///
    /// Transient failures are retried per the retry policy. Any other
    /// failure dead-letters the entry until it is requeued.
    async fn record(&self, kind: EntryKind, id: &EntryId, result: Result<()>) -> Recorded {
        let mut state = self.store.write().await;
        let queue = state.queue_mut();

        if queue.status(kind, id).is_none() {
            debug!("{} {} left the queue during upload", kind, id);
            return Recorded::Gone;
        }

        match result {
            Ok(()) => {
                queue.mark_uploaded(kind, id);
                debug!("Uploaded {} {}", kind, id);
                Recorded::Uploaded
            }
            Err(e) => {
                warn!("Failed to upload {} {}: {}", kind, id, e);
                if queue.mark_failed(kind, id, e.to_string()) {
                    if e.is_transient() {
                        queue.schedule_retry(kind, id, &self.retry_policy, Utc::now());
                        if queue.status(kind, id).is_some_and(|s| s.is_dead_lettered()) {
                            warn!("{} {} exhausted its upload attempts", kind, id);
                        }
                    } else {
                        queue.dead_letter(kind, id);
                        warn!("{} {} will not be retried until requeued", kind, id);
                    }
                }
                Recorded::Failed
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
