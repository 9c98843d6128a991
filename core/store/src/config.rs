//! Store configuration.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;

use expenses_common::{Error, Result};

/// Default name of the settings collection.
pub const DEFAULT_SETTINGS_COLLECTION: &str = "expenses_settings";

/// Default name of the ledger collection.
pub const DEFAULT_LEDGER_COLLECTION: &str = "expenses_local";

/// Default number of entries per page.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Where and how the two collections are stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend kind (e.g., "memory", "sqlite").
    pub backend: String,
    /// Backend-specific configuration.
    #[serde(default)]
    pub backend_config: Value,
    #[serde(default = "default_settings_collection")]
    pub settings_collection: String,
    #[serde(default = "default_ledger_collection")]
    pub ledger_collection: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_settings_collection() -> String {
    DEFAULT_SETTINGS_COLLECTION.to_string()
}

fn default_ledger_collection() -> String {
    DEFAULT_LEDGER_COLLECTION.to_string()
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl StoreConfig {
    /// Configuration for a backend with default collection names.
    pub fn new(backend: impl Into<String>, backend_config: Value) -> Self {
        Self {
            backend: backend.into(),
            backend_config,
            settings_collection: default_settings_collection(),
            ledger_collection: default_ledger_collection(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// In-process collections, lost on exit.
    pub fn memory() -> Self {
        Self::new("memory", Value::Null)
    }

    /// SQLite files under `root`.
    pub fn sqlite(root: impl AsRef<Path>) -> Self {
        Self::new(
            "sqlite",
            json!({ "root": root.as_ref().to_string_lossy() }),
        )
    }

    /// Check the configuration for values no backend accepts.
    ///
    /// # Errors
    /// - Empty backend or collection names
    /// - Both collections with the same name
    /// - Zero page size
    pub fn validate(&self) -> Result<()> {
        if self.backend.is_empty() {
            return Err(Error::InvalidInput("Backend must not be empty".to_string()));
        }
        if self.settings_collection.is_empty() || self.ledger_collection.is_empty() {
            return Err(Error::InvalidInput(
                "Collection names must not be empty".to_string(),
            ));
        }
        if self.settings_collection == self.ledger_collection {
            return Err(Error::InvalidInput(
                "Settings and ledger collections must differ".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(Error::InvalidInput("Page size must be positive".to_string()));
        }
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

    /// Load configuration from a file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    /// Write configuration to a file, creating parent directories.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.to_json()?).await?;
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_in() {
        let config = StoreConfig::from_json(r#"{"backend": "memory"}"#).unwrap();
        assert_eq!(config.settings_collection, "expenses_settings");
        assert_eq!(config.ledger_collection, "expenses_local");
        assert_eq!(config.page_size, 20);
        assert_eq!(config.backend_config, Value::Null);
    }

    #[test]
    fn test_config_serialization() {
        let config = StoreConfig::sqlite("/tmp/expenses");
        let json = config.to_json().unwrap();
        let back = StoreConfig::from_json(&json).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.backend_config["root"], "/tmp/expenses");
    }

    #[test]
    fn test_validation() {
        let mut config = StoreConfig::memory();
        config.page_size = 0;
        assert!(config.validate().is_err());

        let mut config = StoreConfig::memory();
        config.ledger_collection = config.settings_collection.clone();
        assert!(config.validate().is_err());

        assert!(StoreConfig::from_json(r#"{"backend": ""}"#).is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = StoreConfig::memory();
        config.page_size = 5;
        config.save(&path).await.unwrap();

        assert_eq!(StoreConfig::load(&path).await.unwrap(), config);
    }
}
