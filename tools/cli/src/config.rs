//! CLI configuration: where data lives and which store backs it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use loantrack_sync::SyncConfig;

/// Name of the config file inside the data directory.
pub const CONFIG_FILE: &str = "loantrack.json";

/// Backend choice for durable records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Registered store name: `local`, `sqlite` or `memory`.
    pub kind: String,
    /// Directory (local) or database file (sqlite). Defaults inside the
    /// data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: "local".to_string(),
            path: None,
        }
    }
}

/// Contents of `loantrack.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    /// Base URL uploads are posted to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_endpoint: Option<Url>,
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Read the config file, or defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.sync.validate().context("Invalid sync settings")?;
        Ok(config)
    }

    /// Store settings as passed to the store registry.
    pub fn store_settings(&self, data_dir: &Path) -> serde_json::Value {
        let default_path = match self.store.kind.as_str() {
            "sqlite" => data_dir.join("loantrack.db"),
            _ => data_dir.join("records"),
        };
        let path = self.store.path.clone().unwrap_or(default_path);
        serde_json::json!({ "path": path })
    }
}

/// Default data directory, e.g. `~/.local/share/loantrack`.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("loantrack")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load_or_default(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.store.kind, "local");
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"{
                "store": { "kind": "sqlite" },
                "upload_endpoint": "https://api.example.com/v1/",
                "sync": { "periodic_interval": 10, "retry": { "max_attempts": 5 } }
            }"#,
        )
        .unwrap();

        let config = AppConfig::load_or_default(&path).unwrap();
        assert_eq!(config.store.kind, "sqlite");
        assert_eq!(config.sync.periodic_interval.as_secs(), 10);
        assert_eq!(config.sync.retry.max_attempts, Some(5));
        assert_eq!(
            config.store_settings(Path::new("/data"))["path"],
            "/data/loantrack.db"
        );
    }

    #[test]
    fn test_invalid_sync_settings_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{ "sync": { "upload_timeout": 0 } }"#).unwrap();
        assert!(AppConfig::load_or_default(&path).is_err());
    }
}
