//! Record store trait definition.

use async_trait::async_trait;

use loantrack_common::{Error, Result};

/// Durable key-value store for serialized application records.
///
/// Values are opaque byte blobs. Implementations must replace a value
/// atomically on `set`: a reader observes either the previous blob or the
/// new one, never a partial write.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Get the store name (e.g., "memory", "local", "sqlite").
    fn name(&self) -> &str;

    /// Read the value stored under `key`.
    ///
    /// # Returns
    /// `None` when nothing has been stored under the key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove the value under `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// List all keys currently stored.
    async fn keys(&self) -> Result<Vec<String>>;
}

/// Check that a key is usable by every store backend.
///
/// Keys must be non-empty and limited to ASCII alphanumerics, `-`, `_` and
/// `.`, and must not start with a dot.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidInput("Store key cannot be empty".to_string()));
    }
    if key.starts_with('.') {
        return Err(Error::InvalidInput(format!(
            "Store key cannot start with '.': {}",
            key
        )));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(Error::InvalidInput(format!("Invalid store key: {}", key)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        assert!(validate_key("offlineData").is_ok());
        assert!(validate_key("queue-v1.json").is_ok());
    }

    #[test]
    fn test_invalid_keys() {
        assert!(validate_key("").is_err());
        assert!(validate_key(".hidden").is_err());
        assert!(validate_key("../escape").is_err());
        assert!(validate_key("a/b").is_err());
    }
}
