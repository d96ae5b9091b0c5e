//! Common utilities and types shared across LoanTrack modules.
//!
//! This module provides the error type and the identifier newtypes used by
//! the storage, sync, notification and loan crates.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ApplicationId, EntryId, MediaKind};
