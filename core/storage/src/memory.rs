//! In-memory record store for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::provider::{validate_key, RecordStore};
use loantrack_common::{Error, Result};

/// In-memory record store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Reads and writes can be made to fail to simulate an
/// unavailable platform store.
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `set` and `remove` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `get` fail (or succeed again).
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("Memory store is read-only".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> Error {
    Error::Storage("Memory store lock poisoned".to_string())
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Storage("Memory store is unreadable".to_string()));
        }
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        validate_key(key)?;
        self.check_writable()?;
        self.records
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.check_writable()?;
        self.records.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let mut keys: Vec<String> = records.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStore::new();
        store.set("offlineData", b"{}".to_vec()).await.unwrap();

        let value = store.get("offlineData").await.unwrap();
        assert_eq!(value, Some(b"{}".to_vec()));
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = MemoryStore::new();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_replaces_value() {
        let store = MemoryStore::new();
        store.set("k", b"one".to_vec()).await.unwrap();
        store.set("k", b"two".to_vec()).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = MemoryStore::new();
        store.set("k", b"v".to_vec()).await.unwrap();
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_failed_writes_keep_previous_value() {
        let store = MemoryStore::new();
        store.set("k", b"old".to_vec()).await.unwrap();

        store.set_fail_writes(true);
        let result = store.set("k", b"new".to_vec()).await;
        assert!(matches!(result, Err(Error::Storage(_))));
        assert_eq!(store.get("k").await.unwrap(), Some(b"old".to_vec()));

        store.set_fail_writes(false);
        store.set("k", b"new".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_keys_sorted() {
        let store = MemoryStore::new();
        store.set("b", vec![]).await.unwrap();
        store.set("a", vec![]).await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failed_reads() {
        let store = MemoryStore::new();
        store.set("k", b"v".to_vec()).await.unwrap();

        store.set_fail_reads(true);
        assert!(matches!(store.get("k").await, Err(Error::Storage(_))));

        store.set_fail_reads(false);
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }
}
