//! Store registry for resolving a record store from configuration.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::RecordStore;
use loantrack_common::{Error, Result};

/// Factory function type for creating stores.
pub type StoreFactory = Box<dyn Fn(Value) -> Result<Arc<dyn RecordStore>> + Send + Sync>;

/// Registry for record store factories.
///
/// Allows selecting the durable backend by name and JSON configuration,
/// as read from the application config file.
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// Resolve a store by name and configuration.
    ///
    /// # Errors
    /// - Store not found
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn RecordStore>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Store '{}' is not registered", name)))?;
        factory(config)
    }

    /// Get list of registered store names, sorted.
    pub fn stores(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a store is registered.
    pub fn has_store(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

fn required_path(config: &Value, store: &str) -> Result<String> {
    config
        .get("path")
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| Error::InvalidInput(format!("{} store requires 'path'", store)))
}

/// Create a registry with the built-in stores: `memory`, `local`, `sqlite`.
pub fn create_default_registry() -> StoreRegistry {
    let mut factories: HashMap<String, StoreFactory> = HashMap::new();

    factories.insert(
        "memory".to_string(),
        Box::new(|_config| Ok(Arc::new(crate::memory::MemoryStore::new()))),
    );

    factories.insert(
        "local".to_string(),
        Box::new(|config| {
            let root = required_path(&config, "local")?;
            Ok(Arc::new(crate::local::LocalStore::new(root)?))
        }),
    );

    factories.insert(
        "sqlite".to_string(),
        Box::new(|config| {
            let path = required_path(&config, "sqlite")?;
            Ok(Arc::new(crate::sqlite::SqliteStore::open(path)?))
        }),
    );

    StoreRegistry { factories }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = create_default_registry();
        assert!(!registry.has_store("gdrive"));
        assert!(matches!(
            registry.resolve("gdrive", Value::Null),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_resolve_memory() {
        let registry = create_default_registry();
        assert!(registry.has_store("memory"));
        let store = registry.resolve("memory", Value::Null).unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn test_default_registry_stores() {
        let registry = create_default_registry();
        assert_eq!(registry.stores(), vec!["local", "memory", "sqlite"]);
    }

    #[test]
    fn test_local_requires_path() {
        let registry = create_default_registry();
        assert!(registry.resolve("local", serde_json::json!({})).is_err());

        let temp = TempDir::new().unwrap();
        let config = serde_json::json!({ "path": temp.path().to_string_lossy() });
        let store = registry.resolve("local", config).unwrap();
        assert_eq!(store.name(), "local");
    }
}
