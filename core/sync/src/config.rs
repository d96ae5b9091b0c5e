//! Sync configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use loantrack_common::{Error, Result};

use crate::persistence::DEFAULT_QUEUE_KEY;
use crate::retry::RetryPolicy;

/// Default URL checked by the connectivity probe.
pub const DEFAULT_PROBE_URL: &str = "https://www.google.com";

/// Configuration for the offline queue and sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Period between connectivity checks.
    #[serde(with = "serde_secs")]
    pub periodic_interval: Duration,
    /// Maximum time a single upload attempt may take.
    #[serde(with = "serde_secs")]
    pub upload_timeout: Duration,
    /// URL used for reachability checks.
    pub probe_url: String,
    /// Maximum time a reachability check may take.
    #[serde(with = "serde_secs")]
    pub probe_timeout: Duration,
    /// Record store key holding the serialized queue.
    pub queue_key: String,
    /// Spacing and cap of retries for failed entries.
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            periodic_interval: Duration::from_secs(30),
            upload_timeout: Duration::from_secs(60),
            probe_url: DEFAULT_PROBE_URL.to_string(),
            probe_timeout: Duration::from_secs(5),
            queue_key: DEFAULT_QUEUE_KEY.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Check values that would make the engine misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.periodic_interval.is_zero() {
            return Err(Error::InvalidInput(
                "periodic_interval must be greater than zero".to_string(),
            ));
        }
        if self.upload_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "upload_timeout must be greater than zero".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::InvalidInput(
                "retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.retry.max_attempts == Some(0) {
            return Err(Error::InvalidInput(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        loantrack_storage::validate_key(&self.queue_key)?;
        url::Url::parse(&self.probe_url)
            .map_err(|e| Error::InvalidInput(format!("Invalid probe_url: {}", e)))?;
        Ok(())
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_json(&content)
    }
}

/// Serde helper storing a `Duration` as whole seconds.
pub(crate) mod serde_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
