//! The applicant's loan book: applications, current selection and reports.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use loantrack_common::{ApplicationId, EntryId, Error, Result};
use loantrack_storage::RecordStore;

use crate::application::{
    ApplicationDocument, ApplicationStatus, ApplicationUpdate, LoanApplication, NewApplication,
    ReviewDecision,
};
use crate::catalog::LoanCatalog;

/// Store key the loan book is persisted under.
pub const LOAN_BOOK_KEY: &str = "loanBook";

/// Aggregates over all applications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanReport {
    pub total_applications: usize,
    pub by_status: BTreeMap<ApplicationStatus, usize>,
    pub total_amount: u64,
    pub approved_amount: u64,
    /// Approved share of decided (approved or rejected) applications, 0.0
    /// to 1.0. Zero when nothing has been decided.
    pub approval_rate: f64,
}

impl LoanReport {
    pub fn count(&self, status: ApplicationStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Applications in submission order plus the one the user is working on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanBook {
    #[serde(skip)]
    catalog: LoanCatalog,
    applications: Vec<LoanApplication>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current: Option<ApplicationId>,
}

impl Default for LoanBook {
    fn default() -> Self {
        Self::new(LoanCatalog::default())
    }
}

impl LoanBook {
    pub fn new(catalog: LoanCatalog) -> Self {
        Self {
            catalog,
            applications: Vec::new(),
            current: None,
        }
    }

    pub fn catalog(&self) -> &LoanCatalog {
        &self.catalog
    }

    pub fn applications(&self) -> &[LoanApplication] {
        &self.applications
    }

    pub fn get(&self, id: &ApplicationId) -> Option<&LoanApplication> {
        self.applications.iter().find(|a| &a.id == id)
    }

    fn get_mut(&mut self, id: &ApplicationId) -> Result<&mut LoanApplication> {
        self.applications
            .iter_mut()
            .find(|a| &a.id == id)
            .ok_or_else(|| Error::NotFound(format!("Application {}", id)))
    }

    /// Submit an application. It becomes the current application.
    ///
    /// # Errors
    /// - Unknown loan type
    /// - Amount zero or above the loan type's maximum
    pub fn create(&mut self, new: NewApplication) -> Result<&LoanApplication> {
        self.catalog.require(&new.loan_type)?.check_amount(new.amount)?;
        if new.purpose.trim().is_empty() {
            return Err(Error::InvalidInput("Loan purpose cannot be empty".to_string()));
        }

        let application = LoanApplication::submit(new);
        info!(
            "Submitted {} application {} for {}",
            application.loan_type, application.id, application.amount
        );
        self.current = Some(application.id.clone());
        self.applications.push(application);
        Ok(&self.applications[self.applications.len() - 1])
    }

    /// Change amount, purpose or notes of an undecided application.
    ///
    /// # Errors
    /// - Application not found
    /// - Application already approved or rejected
    /// - New amount out of range for its loan type
    pub fn update(&mut self, id: &ApplicationId, update: ApplicationUpdate) -> Result<&LoanApplication> {
        let existing = self
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("Application {}", id)))?;
        if existing.status.is_decided() {
            return Err(Error::Conflict(format!(
                "Application {} is already {}",
                id, existing.status
            )));
        }
        if let Some(amount) = update.amount {
            self.catalog.require(&existing.loan_type)?.check_amount(amount)?;
        }
        if update.purpose.as_ref().is_some_and(|p| p.trim().is_empty()) {
            return Err(Error::InvalidInput("Loan purpose cannot be empty".to_string()));
        }

        let application = self.get_mut(id)?;
        if let Some(amount) = update.amount {
            application.amount = amount;
        }
        if let Some(purpose) = update.purpose {
            application.purpose = purpose;
        }
        if let Some(notes) = update.notes {
            application.notes = Some(notes);
        }
        debug!("Updated application {}", id);
        Ok(&*application)
    }

    /// Record a reviewer's decision.
    ///
    /// # Errors
    /// - Application not found
    /// - Application is not pending or awaiting clarification
    /// - Reviewer name empty
    pub fn review(
        &mut self,
        id: &ApplicationId,
        decision: ReviewDecision,
        reviewer: &str,
        notes: Option<String>,
    ) -> Result<&LoanApplication> {
        if reviewer.trim().is_empty() {
            return Err(Error::InvalidInput("Reviewer cannot be empty".to_string()));
        }
        let application = self.get_mut(id)?;
        if !application.status.is_reviewable() {
            return Err(Error::Conflict(format!(
                "Application {} is {} and cannot be reviewed",
                id, application.status
            )));
        }

        application.status = decision.into();
        application.reviewed_at = Some(Utc::now());
        application.reviewed_by = Some(reviewer.to_string());
        if notes.is_some() {
            application.notes = notes;
        }
        info!("Application {} reviewed by {}: {}", id, reviewer, application.status);
        Ok(&*application)
    }

    /// Attach a document.
    ///
    /// # Errors
    /// - Application not found
    /// - A document with the same id is already attached
    pub fn add_document(&mut self, id: &ApplicationId, document: ApplicationDocument) -> Result<()> {
        let application = self.get_mut(id)?;
        if application.document(&document.id).is_some() {
            return Err(Error::AlreadyExists(format!(
                "Document {} on application {}",
                document.id, id
            )));
        }
        application.documents.push(document);
        Ok(())
    }

    /// Detach a document. Returns whether it was attached.
    pub fn remove_document(&mut self, id: &ApplicationId, document_id: &EntryId) -> Result<bool> {
        let application = self.get_mut(id)?;
        let before = application.documents.len();
        application.documents.retain(|d| &d.id != document_id);
        Ok(application.documents.len() != before)
    }

    /// Select the application the user is working on, or clear it.
    pub fn set_current(&mut self, id: Option<ApplicationId>) -> Result<()> {
        if let Some(id) = &id {
            if self.get(id).is_none() {
                return Err(Error::NotFound(format!("Application {}", id)));
            }
        }
        self.current = id;
        Ok(())
    }

    pub fn current(&self) -> Option<&LoanApplication> {
        self.current.as_ref().and_then(|id| self.get(id))
    }

    pub fn report(&self) -> LoanReport {
        let mut by_status = BTreeMap::new();
        let mut total_amount = 0u64;
        let mut approved_amount = 0u64;

        for application in &self.applications {
            *by_status.entry(application.status).or_insert(0) += 1;
            total_amount = total_amount.saturating_add(application.amount);
            if application.status == ApplicationStatus::Approved {
                approved_amount = approved_amount.saturating_add(application.amount);
            }
        }

        let approved = by_status.get(&ApplicationStatus::Approved).copied().unwrap_or(0);
        let rejected = by_status.get(&ApplicationStatus::Rejected).copied().unwrap_or(0);
        let decided = approved + rejected;
        let approval_rate = if decided == 0 {
            0.0
        } else {
            approved as f64 / decided as f64
        };

        LoanReport {
            total_applications: self.applications.len(),
            by_status,
            total_amount,
            approved_amount,
            approval_rate,
        }
    }
}

/// Persists a loan book as JSON in a record store.
#[derive(Clone)]
pub struct LoanBookStore {
    store: Arc<dyn RecordStore>,
}

impl LoanBookStore {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Load the stored book, or an empty one over `catalog`.
    pub async fn load(&self, catalog: LoanCatalog) -> Result<LoanBook> {
        match self.store.get(LOAN_BOOK_KEY).await? {
            Some(bytes) => {
                let mut book: LoanBook = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::Serialization(e.to_string()))?;
                book.catalog = catalog;
                if book.current.as_ref().is_some_and(|id| book.get(id).is_none()) {
                    book.current = None;
                }
                Ok(book)
            }
            None => Ok(LoanBook::new(catalog)),
        }
    }

    pub async fn save(&self, book: &LoanBook) -> Result<()> {
        let bytes = serde_json::to_vec(book).map_err(|e| Error::Serialization(e.to_string()))?;
        self.store.set(LOAN_BOOK_KEY, bytes).await
    }
}
