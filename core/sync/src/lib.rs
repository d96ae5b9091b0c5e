//! LoanTrack offline sync
//!
//! Keeps captured documents and submitted forms in a durable offline queue
//! and drains it to the server when the network is reachable:
//! - Offline queue with per-entry upload status and retry bookkeeping
//! - Write-through persistence to a record store
//! - Single-flight sync engine with per-entry timeouts
//! - Periodic connectivity checks and on-demand passes

pub mod config;
pub mod engine;
pub mod persistence;
pub mod probe;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod transport;

// Re-export main types
pub use config::{SyncConfig, DEFAULT_PROBE_URL};
pub use engine::{SyncEngine, SyncOutcome, SyncReport};
pub use persistence::{QueuePersistence, QueueSnapshot, DEFAULT_QUEUE_KEY, SNAPSHOT_VERSION};
pub use probe::{ConnectivityMonitor, ConnectivityProbe, FixedProbe, HttpProbe};
pub use queue::{EntryKind, OfflineQueue, QueueEntry, QueuedDocument, QueuedForm, UploadStatus};
pub use retry::RetryPolicy;
pub use scheduler::{run_tick, SyncRequest, SyncScheduler};
pub use state::{SyncState, SyncSummary};
pub use store::SyncStore;
pub use transport::{HttpTransport, UploadTransport};
