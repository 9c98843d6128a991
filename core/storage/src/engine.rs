//! Selection of a database engine from configuration.

use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use crate::database::Backend;
use crate::http::{Credentials, HttpBackend};
use crate::memory::MemoryBackend;
use crate::sqlite::SqliteBackend;
use expenses_common::{Error, Result};

#[derive(Deserialize)]
struct SqliteConfig {
    root: PathBuf,
}

#[derive(Deserialize)]
struct HttpConfig {
    url: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// A configured database engine.
///
/// - `memory`: no configuration
/// - `sqlite`: `{"root": "<dir>"}`
/// - `http`: `{"url": "...", "username": "...", "password": "..."}`
pub enum Engine {
    Memory,
    Sqlite { root: PathBuf },
    Http { url: String, credentials: Option<Credentials> },
}

impl Engine {
    /// Parse an engine kind and its JSON configuration.
    ///
    /// # Errors
    /// - `InvalidInput` for an unknown kind or a configuration it rejects
    pub fn from_config(kind: &str, config: &Value) -> Result<Self> {
        match kind {
            "memory" => Ok(Engine::Memory),
            "sqlite" => {
                let SqliteConfig { root } = parse(kind, config)?;
                Ok(Engine::Sqlite { root })
            }
            "http" => {
                let HttpConfig {
                    url,
                    username,
                    password,
                } = parse(kind, config)?;
                let credentials =
                    username.map(|username| Credentials::new(username, password.unwrap_or_default()));
                Ok(Engine::Http { url, credentials })
            }
            other => Err(Error::InvalidInput(format!("Unknown backend '{}'", other))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Engine::Memory => "memory",
            Engine::Sqlite { .. } => "sqlite",
            Engine::Http { .. } => "http",
        }
    }

    /// Build the backend. A `memory` engine starts with no collections.
    pub fn build(self) -> Result<Arc<dyn Backend>> {
        Ok(match self {
            Engine::Memory => Arc::new(MemoryBackend::new()),
            Engine::Sqlite { root } => Arc::new(SqliteBackend::new(root)?),
            Engine::Http { url, credentials } => Arc::new(HttpBackend::new(&url, credentials)?),
        })
    }
}

fn parse<T: serde::de::DeserializeOwned>(kind: &str, config: &Value) -> Result<T> {
    T::deserialize(config)
        .map_err(|e| Error::InvalidInput(format!("Invalid {} backend configuration: {}", kind, e)))
}

/// Resolve a backend from its kind and JSON configuration.
pub fn resolve_backend(kind: &str, config: &Value) -> Result<Arc<dyn Backend>> {
    Engine::from_config(kind, config)?.build()
}
