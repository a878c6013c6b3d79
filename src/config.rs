use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::sqlite::{SqliteBackend, SqliteConfig};
use serde::Deserialize;
use std::sync::Arc;

/// Schema-wide behavior switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchemaOptions {
    /// Keep the entities of the last read/write on the cursor.
    pub cache_results: bool,
    /// Store object values as JSON text instead of rejecting them.
    pub serialize_objects: bool,
    /// One of trace, debug, info, warn, error, fatal, off.
    pub logging_level: Option<String>,
}

impl SchemaOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_results(mut self, enabled: bool) -> Self {
        self.cache_results = enabled;
        self
    }

    pub fn with_serialize_objects(mut self, enabled: bool) -> Self {
        self.serialize_objects = enabled;
        self
    }

    pub fn with_logging_level(mut self, level: &str) -> Self {
        self.logging_level = Some(level.to_string());
        self
    }
}

/// Which backend to open, e.g. `{"type": "sqlite", "path": "app.db"}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub path: Option<String>,
}

impl BackendConfig {
    pub fn sqlite(path: &str) -> Self {
        Self {
            kind: "sqlite".to_string(),
            path: Some(path.to_string()),
        }
    }

    /// Open the configured backend.
    pub fn open(&self) -> Result<Arc<dyn Backend>> {
        match self.kind.as_str() {
            "sqlite" => {
                let path = self.path.as_deref().unwrap_or(":memory:");
                let backend = SqliteBackend::open(SqliteConfig::new(path))?;
                Ok(Arc::new(backend))
            }
            other => Err(Error::Configuration(format!(
                "Failed to load backend of type {}",
                other
            ))),
        }
    }
}

/// Top-level configuration: backend plus schema options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MapperConfig {
    pub backend: BackendConfig,
    #[serde(default)]
    pub schema: SchemaOptions,
}

impl MapperConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
