//! Durable key-value storage for LoanTrack.
//!
//! This module provides a trait-based interface for the record stores that
//! hold the serialized offline queue across restarts, and a registry for
//! resolving a store by name.
//!
//! # Design Principles
//! - Whole-value writes: `set` replaces the stored blob atomically
//! - Async operations: all I/O is async
//! - Unified error semantics: failures surface as `Error::Storage` or `Error::Io`

pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod sqlite;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use provider::{validate_key, RecordStore};
pub use registry::{create_default_registry, StoreFactory, StoreRegistry};
pub use sqlite::SqliteStore;
