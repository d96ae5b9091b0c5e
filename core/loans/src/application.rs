//! Loan applications and their review lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use loantrack_common::{ApplicationId, EntryId, Error, MediaKind, Result};

/// Where an application stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Clarification,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 5] = [
        ApplicationStatus::Draft,
        ApplicationStatus::Pending,
        ApplicationStatus::Approved,
        ApplicationStatus::Rejected,
        ApplicationStatus::Clarification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Draft => "draft",
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Clarification => "clarification",
        }
    }

    /// Whether a reviewer may act on an application in this status.
    pub fn is_reviewable(&self) -> bool {
        matches!(self, ApplicationStatus::Pending | ApplicationStatus::Clarification)
    }

    /// Whether a final decision has been made.
    pub fn is_decided(&self) -> bool {
        matches!(self, ApplicationStatus::Approved | ApplicationStatus::Rejected)
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidInput(format!("Unknown application status: {}", s)))
    }
}

/// Outcome a reviewer can give.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    Rejected,
    Clarification,
}

impl From<ReviewDecision> for ApplicationStatus {
    fn from(decision: ReviewDecision) -> Self {
        match decision {
            ReviewDecision::Approved => ApplicationStatus::Approved,
            ReviewDecision::Rejected => ApplicationStatus::Rejected,
            ReviewDecision::Clarification => ApplicationStatus::Clarification,
        }
    }
}

impl FromStr for ReviewDecision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.parse::<ApplicationStatus>()? {
            ApplicationStatus::Approved => Ok(ReviewDecision::Approved),
            ApplicationStatus::Rejected => Ok(ReviewDecision::Rejected),
            ApplicationStatus::Clarification => Ok(ReviewDecision::Clarification),
            other => Err(Error::InvalidInput(format!("{} is not a review decision", other))),
        }
    }
}

/// Where the applicant was when applying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
}

/// A document attached to an application.
///
/// The id is shared with the offline queue entry that uploads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDocument {
    pub id: EntryId,
    pub kind: MediaKind,
    pub uri: String,
    pub name: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub is_verified: bool,
}

/// Fields supplied when applying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewApplication {
    pub loan_type: String,
    pub amount: u64,
    pub purpose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl NewApplication {
    pub fn new(loan_type: impl Into<String>, amount: u64, purpose: impl Into<String>) -> Self {
        Self {
            loan_type: loan_type.into(),
            amount,
            purpose: purpose.into(),
            location: None,
            notes: None,
        }
    }
}

/// Changes an applicant may make after applying. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationUpdate {
    pub amount: Option<u64>,
    pub purpose: Option<String>,
    pub notes: Option<String>,
}

/// A submitted loan application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanApplication {
    pub id: ApplicationId,
    pub loan_type: String,
    pub amount: u64,
    pub purpose: String,
    pub status: ApplicationStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(default)]
    pub documents: Vec<ApplicationDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl LoanApplication {
    /// Build a pending application from submitted fields.
    pub(crate) fn submit(new: NewApplication) -> Self {
        Self {
            id: ApplicationId::generate(),
            loan_type: new.loan_type,
            amount: new.amount,
            purpose: new.purpose,
            status: ApplicationStatus::Pending,
            submitted_at: Utc::now(),
            reviewed_at: None,
            reviewed_by: None,
            documents: Vec::new(),
            location: new.location,
            notes: new.notes,
        }
    }

    pub fn document(&self, id: &EntryId) -> Option<&ApplicationDocument> {
        self.documents.iter().find(|d| &d.id == id)
    }

    /// Required documents of `required` not matched by any attached
    /// document name (case-insensitive substring match).
    pub fn missing_documents<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|req| {
                let needle = req.to_lowercase();
                !self
                    .documents
                    .iter()
                    .any(|d| d.name.to_lowercase().contains(&needle))
            })
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        assert_eq!("Approved".parse::<ApplicationStatus>().unwrap(), ApplicationStatus::Approved);
        assert!("closed".parse::<ApplicationStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&ApplicationStatus::Clarification).unwrap(),
            "\"clarification\""
        );
    }

    #[test]
    fn test_review_decision_parsing() {
        assert_eq!("rejected".parse::<ReviewDecision>().unwrap(), ReviewDecision::Rejected);
        assert!("pending".parse::<ReviewDecision>().is_err());
        assert_eq!(
            ApplicationStatus::from(ReviewDecision::Clarification),
            ApplicationStatus::Clarification
        );
    }

    #[test]
    fn test_reviewable_statuses() {
        let reviewable: Vec<_> = ApplicationStatus::ALL
            .into_iter()
            .filter(|s| s.is_reviewable())
            .collect();
        assert_eq!(
            reviewable,
            vec![ApplicationStatus::Pending, ApplicationStatus::Clarification]
        );
    }

    #[test]
    fn test_missing_documents() {
        let mut application = LoanApplication::submit(NewApplication::new("gold", 1000, "repairs"));
        application.documents.push(ApplicationDocument {
            id: EntryId::new("d1").unwrap(),
            kind: MediaKind::Document,
            uri: "file:///docs/id.pdf".to_string(),
            name: "Identity Proof - Aadhaar.pdf".to_string(),
            size: 10,
            uploaded_at: Utc::now(),
            is_verified: false,
        });

        let required = vec!["Gold Valuation Certificate".to_string(), "Identity Proof".to_string()];
        assert_eq!(application.missing_documents(&required), vec!["Gold Valuation Certificate"]);
    }
}
