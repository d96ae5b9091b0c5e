//! LoanTrack loan book
//!
//! Loan product catalog, applications with their review lifecycle, and
//! reporting over an applicant's applications.

pub mod application;
pub mod book;
pub mod catalog;

pub use application::{
    ApplicationDocument, ApplicationStatus, ApplicationUpdate, LoanApplication, Location,
    NewApplication, ReviewDecision,
};
pub use book::{LoanBook, LoanBookStore, LoanReport, LOAN_BOOK_KEY};
pub use catalog::{LoanCatalog, LoanType};
