//! Offline queue of pending document and form uploads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use loantrack_common::{ApplicationId, EntryId, Error, MediaKind, Result};

use crate::retry::RetryPolicy;

/// Which collection of the queue an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Document,
    Form,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Document => f.write_str("document"),
            EntryKind::Form => f.write_str("form"),
        }
    }
}

/// Upload status of a single entry.
///
/// An entry is either pending (not uploaded, error optional) or uploaded
/// with no error. The fields are private so that no caller can build an
/// uploaded entry that still carries an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadStatus {
    #[serde(default)]
    uploaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    #[serde(default)]
    attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    dead_lettered: bool,
}

impl UploadStatus {
    /// Whether the entry has been uploaded.
    pub fn is_uploaded(&self) -> bool {
        self.uploaded
    }

    /// Whether the entry still awaits upload.
    pub fn is_pending(&self) -> bool {
        !self.uploaded
    }

    /// Message of the last failed attempt.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Number of failed attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Earliest time the next attempt may be made.
    pub fn next_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.next_attempt_at
    }

    /// Whether the entry exhausted its attempts and is skipped by passes.
    pub fn is_dead_lettered(&self) -> bool {
        self.dead_lettered
    }

    /// Whether a pass running at `now` should attempt this entry.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.uploaded
            && !self.dead_lettered
            && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    fn mark_uploaded(&mut self) -> bool {
        if self.uploaded {
            return false;
        }
        self.uploaded = true;
        self.last_error = None;
        self.next_attempt_at = None;
        self.dead_lettered = false;
        true
    }

    fn mark_failed(&mut self, message: String) -> bool {
        if self.uploaded {
            return false;
        }
        self.last_error = Some(message);
        self.attempts = self.attempts.saturating_add(1);
        true
    }

    fn schedule_retry(&mut self, policy: &RetryPolicy, now: DateTime<Utc>) {
        if self.uploaded {
            return;
        }
        if policy.is_exhausted(self.attempts) {
            self.dead_lettered = true;
            self.next_attempt_at = None;
        } else {
            self.next_attempt_at = policy.next_attempt_at(self.attempts, now);
        }
    }

    fn dead_letter(&mut self) -> bool {
        if self.uploaded {
            return false;
        }
        self.dead_lettered = true;
        self.next_attempt_at = None;
        true
    }

    fn requeue(&mut self) -> bool {
        if self.uploaded {
            return false;
        }
        self.attempts = 0;
        self.next_attempt_at = None;
        self.dead_lettered = false;
        true
    }

    fn normalize(&mut self) {
        if self.uploaded {
            self.last_error = None;
            self.next_attempt_at = None;
            self.dead_lettered = false;
        }
    }
}

/// A captured file waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedDocument {
    /// Stable entry id.
    pub id: EntryId,
    /// Media kind of the file.
    pub kind: MediaKind,
    /// Local file reference of the content.
    pub uri: String,
    /// Display name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Loan application the document belongs to.
    pub application_id: ApplicationId,
    /// When the entry was queued.
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    status: UploadStatus,
}

impl QueuedDocument {
    /// Create a pending document entry with a generated id.
    pub fn new(
        kind: MediaKind,
        uri: impl Into<String>,
        name: impl Into<String>,
        size: u64,
        application_id: ApplicationId,
    ) -> Self {
        Self {
            id: EntryId::generate(),
            kind,
            uri: uri.into(),
            name: name.into(),
            size,
            application_id,
            created_at: Utc::now(),
            status: UploadStatus::default(),
        }
    }

    /// Replace the generated id.
    pub fn with_id(mut self, id: EntryId) -> Self {
        self.id = id;
        self
    }

    /// Upload status of this entry.
    pub fn status(&self) -> &UploadStatus {
        &self.status
    }
}

/// A submitted form waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedForm {
    /// Stable entry id.
    pub id: EntryId,
    /// Opaque form payload.
    pub form_data: serde_json::Value,
    /// Loan application the form belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<ApplicationId>,
    /// When the entry was queued.
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    status: UploadStatus,
}

impl QueuedForm {
    /// Create a pending form entry with a generated id.
    pub fn new(form_data: serde_json::Value, application_id: Option<ApplicationId>) -> Self {
        Self {
            id: EntryId::generate(),
            form_data,
            application_id,
            created_at: Utc::now(),
            status: UploadStatus::default(),
        }
    }

    /// Replace the generated id.
    pub fn with_id(mut self, id: EntryId) -> Self {
        self.id = id;
        self
    }

    /// Upload status of this entry.
    pub fn status(&self) -> &UploadStatus {
        &self.status
    }
}

/// Common access to queued entries of either kind.
pub trait QueueEntry {
    /// Collection this entry type lives in.
    const KIND: EntryKind;

    fn id(&self) -> &EntryId;
    fn status(&self) -> &UploadStatus;
}

impl QueueEntry for QueuedDocument {
    const KIND: EntryKind = EntryKind::Document;

    fn id(&self) -> &EntryId {
        &self.id
    }

    fn status(&self) -> &UploadStatus {
        &self.status
    }
}

impl QueueEntry for QueuedForm {
    const KIND: EntryKind = EntryKind::Form;

    fn id(&self) -> &EntryId {
        &self.id
    }

    fn status(&self) -> &UploadStatus {
        &self.status
    }
}

/// Two ordered collections of pending uploads plus their pending count.
///
/// A pure data container: it never performs I/O. The pending count always
/// equals the number of entries with `uploaded = false`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfflineQueue {
    documents: Vec<QueuedDocument>,
    forms: Vec<QueuedForm>,
    pending: usize,
}

impl OfflineQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a queue from restored entries, repairing inconsistent status
    /// fields and recomputing the pending count.
    pub fn from_entries(mut documents: Vec<QueuedDocument>, mut forms: Vec<QueuedForm>) -> Self {
        documents.iter_mut().for_each(|d| d.status.normalize());
        forms.iter_mut().for_each(|f| f.status.normalize());
        let mut queue = Self {
            documents,
            forms,
            pending: 0,
        };
        queue.pending = queue.recount();
        queue
    }

    /// Append a document in arrival order.
    ///
    /// # Errors
    /// - A document with the same id is already queued
    pub fn enqueue_document(&mut self, document: QueuedDocument) -> Result<()> {
        Self::check_unique(&self.documents, &document.id)?;
        if document.status.is_pending() {
            self.pending += 1;
        }
        self.documents.push(document);
        Ok(())
    }

    /// Append a form in arrival order.
    ///
    /// # Errors
    /// - A form with the same id is already queued
    pub fn enqueue_form(&mut self, form: QueuedForm) -> Result<()> {
        Self::check_unique(&self.forms, &form.id)?;
        if form.status.is_pending() {
            self.pending += 1;
        }
        self.forms.push(form);
        Ok(())
    }

    fn check_unique<E: QueueEntry>(entries: &[E], id: &EntryId) -> Result<()> {
        if entries.iter().any(|e| e.id() == id) {
            return Err(Error::AlreadyExists(format!(
                "{} {} is already queued",
                E::KIND,
                id
            )));
        }
        Ok(())
    }

    fn status_mut(&mut self, kind: EntryKind, id: &EntryId) -> Option<&mut UploadStatus> {
        match kind {
            EntryKind::Document => self
                .documents
                .iter_mut()
                .find(|d| &d.id == id)
                .map(|d| &mut d.status),
            EntryKind::Form => self
                .forms
                .iter_mut()
                .find(|f| &f.id == id)
                .map(|f| &mut f.status),
        }
    }

    /// Status of an entry, if present.
    pub fn status(&self, kind: EntryKind, id: &EntryId) -> Option<&UploadStatus> {
        match kind {
            EntryKind::Document => self.document(id).map(|d| &d.status),
            EntryKind::Form => self.form(id).map(|f| &f.status),
        }
    }

    /// Mark an entry as uploaded.
    ///
    /// Returns `false` without changing anything when the entry is absent
    /// or already uploaded.
    pub fn mark_uploaded(&mut self, kind: EntryKind, id: &EntryId) -> bool {
        let changed = self
            .status_mut(kind, id)
            .is_some_and(|status| status.mark_uploaded());
        if changed {
            self.pending -= 1;
        }
        changed
    }

    /// Record a failed attempt on a pending entry.
    ///
    /// The entry stays pending and the pending count is unchanged. Returns
    /// `false` when the entry is absent or already uploaded.
    pub fn mark_failed(&mut self, kind: EntryKind, id: &EntryId, message: impl Into<String>) -> bool {
        let message = message.into();
        self.status_mut(kind, id)
            .is_some_and(|status| status.mark_failed(message))
    }

    /// Apply the retry policy to an entry after a failure: defer its next
    /// attempt or dead-letter it once the attempt cap is reached.
    pub fn schedule_retry(
        &mut self,
        kind: EntryKind,
        id: &EntryId,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) {
        if let Some(status) = self.status_mut(kind, id) {
            status.schedule_retry(policy, now);
        }
    }

    /// Stop attempting an entry until it is requeued. It stays pending.
    pub fn dead_letter(&mut self, kind: EntryKind, id: &EntryId) -> bool {
        self.status_mut(kind, id)
            .is_some_and(|status| status.dead_letter())
    }

    /// Reset retry bookkeeping so the entry is attempted on the next pass.
    pub fn requeue(&mut self, kind: EntryKind, id: &EntryId) -> bool {
        self.status_mut(kind, id)
            .is_some_and(|status| status.requeue())
    }

    /// Delete an entry regardless of status.
    pub fn remove(&mut self, kind: EntryKind, id: &EntryId) -> bool {
        let removed_pending = match kind {
            EntryKind::Document => Self::remove_from(&mut self.documents, id),
            EntryKind::Form => Self::remove_from(&mut self.forms, id),
        };
        match removed_pending {
            Some(true) => {
                self.pending -= 1;
                true
            }
            Some(false) => true,
            None => false,
        }
    }

    fn remove_from<E: QueueEntry>(entries: &mut Vec<E>, id: &EntryId) -> Option<bool> {
        let index = entries.iter().position(|e| e.id() == id)?;
        Some(entries.remove(index).status().is_pending())
    }

    /// Remove every uploaded entry from both collections.
    ///
    /// Returns the number of entries removed.
    pub fn prune_uploaded(&mut self) -> usize {
        let before = self.documents.len() + self.forms.len();
        self.documents.retain(|d| d.status.is_pending());
        self.forms.retain(|f| f.status.is_pending());
        self.pending = self.recount();
        before - (self.documents.len() + self.forms.len())
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.documents.clear();
        self.forms.clear();
        self.pending = 0;
    }

    /// Number of entries not yet uploaded.
    pub fn pending_count(&self) -> usize {
        self.pending
    }

    /// Count pending entries from scratch.
    pub fn recount(&self) -> usize {
        self.documents.iter().filter(|d| d.status.is_pending()).count()
            + self.forms.iter().filter(|f| f.status.is_pending()).count()
    }

    /// Number of dead-lettered entries.
    pub fn dead_lettered_count(&self) -> usize {
        self.documents.iter().filter(|d| d.status.dead_lettered).count()
            + self.forms.iter().filter(|f| f.status.dead_lettered).count()
    }

    /// Queued documents in insertion order.
    pub fn documents(&self) -> &[QueuedDocument] {
        &self.documents
    }

    /// Queued forms in insertion order.
    pub fn forms(&self) -> &[QueuedForm] {
        &self.forms
    }

    /// Look up a document by id.
    pub fn document(&self, id: &EntryId) -> Option<&QueuedDocument> {
        self.documents.iter().find(|d| &d.id == id)
    }

    /// Look up a form by id.
    pub fn form(&self, id: &EntryId) -> Option<&QueuedForm> {
        self.forms.iter().find(|f| &f.id == id)
    }

    /// Find which collection holds an id (documents first).
    pub fn kind_of(&self, id: &EntryId) -> Option<EntryKind> {
        if self.document(id).is_some() {
            Some(EntryKind::Document)
        } else if self.form(id).is_some() {
            Some(EntryKind::Form)
        } else {
            None
        }
    }

    /// Copies of the documents a pass at `now` should attempt, in order.
    pub fn eligible_documents(&self, now: DateTime<Utc>) -> Vec<QueuedDocument> {
        self.documents
            .iter()
            .filter(|d| d.status.is_eligible(now))
            .cloned()
            .collect()
    }

    /// Copies of the forms a pass at `now` should attempt, in order.
    pub fn eligible_forms(&self, now: DateTime<Utc>) -> Vec<QueuedForm> {
        self.forms
            .iter()
            .filter(|f| f.status.is_eligible(now))
            .cloned()
            .collect()
    }

    /// Fold in another copy of the queue, such as the stored one.
    ///
    /// Entries missing here are appended in their given order. Entries
    /// present in both keep their local status unless the other copy has
    /// them uploaded. Returns the number of entries added.
    pub fn merge(&mut self, documents: Vec<QueuedDocument>, forms: Vec<QueuedForm>) -> usize {
        let added = Self::merge_into(&mut self.documents, documents, document_status)
            + Self::merge_into(&mut self.forms, forms, form_status);
        self.pending = self.recount();
        added
    }

    fn merge_into<E: QueueEntry>(
        entries: &mut Vec<E>,
        incoming: Vec<E>,
        status_mut: fn(&mut E) -> &mut UploadStatus,
    ) -> usize {
        let mut added = 0;
        for mut entry in incoming {
            match entries.iter_mut().find(|e| e.id() == entry.id()) {
                Some(local) => {
                    if entry.status().is_uploaded() {
                        status_mut(local).mark_uploaded();
                    }
                }
                None => {
                    status_mut(&mut entry).normalize();
                    entries.push(entry);
                    added += 1;
                }
            }
        }
        added
    }
}

fn document_status(document: &mut QueuedDocument) -> &mut UploadStatus {
    &mut document.status
}

fn form_status(form: &mut QueuedForm) -> &mut UploadStatus {
    &mut form.status
}
